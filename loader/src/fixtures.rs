//! Hand-assembled module binaries for tests.
//!
//! Function bodies are raw instruction bytes without the locals prefix or
//! the trailing `end`; the builder adds both. Function indices follow the
//! binary's rules: imported functions first, then local ones in the order
//! they were added.

use crate::module::ValueType;

struct Func {
    name: String,
    type_idx: u32,
    locals: Vec<(u32, ValueType)>,
    body: Vec<u8>,
    exported: bool,
}

enum Import {
    Func(u32),
    Memory(u32, Option<u32>),
    Global,
}

#[derive(Default)]
pub struct ModuleBuilder {
    types: Vec<(Vec<ValueType>, Vec<ValueType>)>,
    imports: Vec<(String, String, Import)>,
    funcs: Vec<Func>,
    memory: Option<(u32, Option<u32>)>,
    export_memory: bool,
    globals: Vec<(bool, i32)>,
    start: Option<String>,
    data: Vec<(i32, Vec<u8>)>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_type(&mut self, params: &[ValueType], results: &[ValueType]) -> u32 {
        self.types.push((params.to_vec(), results.to_vec()));
        (self.types.len() - 1) as u32
    }

    pub fn import_func(
        mut self,
        namespace: &str,
        symbol: &str,
        params: &[ValueType],
        results: &[ValueType],
    ) -> Self {
        let idx = self.push_type(params, results);
        self.imports
            .push((namespace.into(), symbol.into(), Import::Func(idx)));
        self
    }

    pub fn import_memory(mut self, namespace: &str, symbol: &str, min: u32, max: Option<u32>) -> Self {
        self.imports
            .push((namespace.into(), symbol.into(), Import::Memory(min, max)));
        self
    }

    /// Immutable i32 global import.
    pub fn import_global(mut self, namespace: &str, symbol: &str) -> Self {
        self.imports
            .push((namespace.into(), symbol.into(), Import::Global));
        self
    }

    pub fn memory(mut self, min: u32, max: Option<u32>) -> Self {
        self.memory = Some((min, max));
        self
    }

    /// Export memory 0 as `memory`.
    pub fn export_memory(mut self) -> Self {
        self.export_memory = true;
        self
    }

    /// Mutable or immutable i32 global.
    pub fn global_i32(mut self, mutable: bool, init: i32) -> Self {
        self.globals.push((mutable, init));
        self
    }

    /// Exported function.
    pub fn func(self, name: &str, params: &[ValueType], results: &[ValueType], body: &[u8]) -> Self {
        self.add_func(name, params, results, &[], body, true)
    }

    /// Exported function with extra locals.
    pub fn func_with_locals(
        self,
        name: &str,
        params: &[ValueType],
        results: &[ValueType],
        locals: &[(u32, ValueType)],
        body: &[u8],
    ) -> Self {
        self.add_func(name, params, results, locals, body, true)
    }

    /// Function that is not exported.
    pub fn private_func(
        self,
        name: &str,
        params: &[ValueType],
        results: &[ValueType],
        body: &[u8],
    ) -> Self {
        self.add_func(name, params, results, &[], body, false)
    }

    fn add_func(
        mut self,
        name: &str,
        params: &[ValueType],
        results: &[ValueType],
        locals: &[(u32, ValueType)],
        body: &[u8],
        exported: bool,
    ) -> Self {
        let type_idx = self.push_type(params, results);
        self.funcs.push(Func {
            name: name.into(),
            type_idx,
            locals: locals.to_vec(),
            body: body.to_vec(),
            exported,
        });
        self
    }

    pub fn start(mut self, name: &str) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Active data segment for memory 0.
    pub fn data(mut self, offset: i32, bytes: &[u8]) -> Self {
        self.data.push((offset, bytes.to_vec()));
        self
    }

    fn imported_func_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|(_, _, i)| matches!(i, Import::Func(_)))
            .count() as u32
    }

    fn func_index(&self, name: &str) -> u32 {
        let pos = self
            .funcs
            .iter()
            .position(|f| f.name == name)
            .unwrap_or_else(|| panic!("no function named {name}"));
        self.imported_func_count() + pos as u32
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

        if !self.types.is_empty() {
            let mut s = Vec::new();
            uleb(&mut s, self.types.len() as u32);
            for (params, results) in &self.types {
                s.push(0x60);
                uleb(&mut s, params.len() as u32);
                s.extend(params.iter().map(|t| val_byte(*t)));
                uleb(&mut s, results.len() as u32);
                s.extend(results.iter().map(|t| val_byte(*t)));
            }
            section(&mut out, 1, &s);
        }

        if !self.imports.is_empty() {
            let mut s = Vec::new();
            uleb(&mut s, self.imports.len() as u32);
            for (ns, sym, kind) in &self.imports {
                name(&mut s, ns);
                name(&mut s, sym);
                match kind {
                    Import::Func(idx) => {
                        s.push(0x00);
                        uleb(&mut s, *idx);
                    }
                    Import::Memory(min, max) => {
                        s.push(0x02);
                        limits(&mut s, *min, *max);
                    }
                    Import::Global => {
                        s.push(0x03);
                        s.push(0x7F);
                        s.push(0x00);
                    }
                }
            }
            section(&mut out, 2, &s);
        }

        if !self.funcs.is_empty() {
            let mut s = Vec::new();
            uleb(&mut s, self.funcs.len() as u32);
            for f in &self.funcs {
                uleb(&mut s, f.type_idx);
            }
            section(&mut out, 3, &s);
        }

        if let Some((min, max)) = self.memory {
            let mut s = Vec::new();
            uleb(&mut s, 1);
            limits(&mut s, min, max);
            section(&mut out, 5, &s);
        }

        if !self.globals.is_empty() {
            let mut s = Vec::new();
            uleb(&mut s, self.globals.len() as u32);
            for (mutable, init) in &self.globals {
                s.push(0x7F);
                s.push(u8::from(*mutable));
                s.push(0x41);
                sleb(&mut s, *init);
                s.push(0x0B);
            }
            section(&mut out, 6, &s);
        }

        let exported: Vec<&Func> = self.funcs.iter().filter(|f| f.exported).collect();
        let export_count = exported.len() + usize::from(self.export_memory);
        if export_count > 0 {
            let mut s = Vec::new();
            uleb(&mut s, export_count as u32);
            if self.export_memory {
                name(&mut s, "memory");
                s.push(0x02);
                uleb(&mut s, 0);
            }
            for f in exported {
                name(&mut s, &f.name);
                s.push(0x00);
                uleb(&mut s, self.func_index(&f.name));
            }
            section(&mut out, 7, &s);
        }

        if let Some(start) = &self.start {
            let mut s = Vec::new();
            uleb(&mut s, self.func_index(start));
            section(&mut out, 8, &s);
        }

        if !self.funcs.is_empty() {
            let mut s = Vec::new();
            uleb(&mut s, self.funcs.len() as u32);
            for f in &self.funcs {
                let mut body = Vec::new();
                uleb(&mut body, f.locals.len() as u32);
                for (count, ty) in &f.locals {
                    uleb(&mut body, *count);
                    body.push(val_byte(*ty));
                }
                body.extend_from_slice(&f.body);
                body.push(0x0B);
                uleb(&mut s, body.len() as u32);
                s.extend_from_slice(&body);
            }
            section(&mut out, 10, &s);
        }

        if !self.data.is_empty() {
            let mut s = Vec::new();
            uleb(&mut s, self.data.len() as u32);
            for (offset, bytes) in &self.data {
                uleb(&mut s, 0);
                s.push(0x41);
                sleb(&mut s, *offset);
                s.push(0x0B);
                uleb(&mut s, bytes.len() as u32);
                s.extend_from_slice(bytes);
            }
            section(&mut out, 11, &s);
        }

        out
    }
}

fn section(out: &mut Vec<u8>, id: u8, payload: &[u8]) {
    out.push(id);
    uleb(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

fn name(out: &mut Vec<u8>, s: &str) {
    uleb(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn limits(out: &mut Vec<u8>, min: u32, max: Option<u32>) {
    match max {
        Some(max) => {
            out.push(0x01);
            uleb(out, min);
            uleb(out, max);
        }
        None => {
            out.push(0x00);
            uleb(out, min);
        }
    }
}

fn val_byte(t: ValueType) -> u8 {
    match t {
        ValueType::I32 => 0x7F,
        ValueType::I64 => 0x7E,
        ValueType::F32 => 0x7D,
        ValueType::F64 => 0x7C,
        ValueType::V128 => 0x7B,
        ValueType::FuncRef => 0x70,
        ValueType::ExternRef => 0x6F,
    }
}

pub fn uleb(out: &mut Vec<u8>, mut v: u32) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn sleb(out: &mut Vec<u8>, mut v: i32) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// `i32.const v` instruction bytes.
pub fn i32_const(v: i32) -> Vec<u8> {
    let mut out = vec![0x41];
    sleb(&mut out, v);
    out
}

// ── Ready-made modules ───────────────────────────────────────────────

use ValueType::{F32, I32};

/// Stand-in for the reasoning engine: numeric exports, a JSON string
/// region, a trapping export and a logging export. It carries the
/// `__wbindgen_free` glue symbol but no allocator.
///
/// Function index space: 0 = `env.log`.
pub fn reasoning_engine() -> Vec<u8> {
    let json = br#"{"status":"ok","confidence":0.92}"#;
    let mut region = i32_const(64);
    region.extend(i32_const(json.len() as i32));
    let mut log_body = i32_const(128);
    log_body.extend(i32_const(5));
    log_body.extend([0x10, 0x00]); // call env.log
    ModuleBuilder::new()
        .import_func("env", "log", &[I32, I32], &[])
        .memory(1, None)
        .export_memory()
        .data(64, json)
        .data(128, b"hello")
        .func("add", &[I32, I32], &[I32], &[0x20, 0x00, 0x20, 0x01, 0x6a])
        .func("get_status", &[], &[I32, I32], &region)
        .func("crash", &[], &[], &[0x00])
        .func("log_hello", &[], &[], &log_body)
        .func("scale", &[F32, F32], &[F32], &[0x20, 0x00, 0x20, 0x01, 0x94])
        .func("__wbindgen_free", &[I32, I32], &[], &[])
        .build()
}

/// Module following the wasm-bindgen calling convention.
///
/// Global 0 is the shadow stack pointer, global 1 the heap bump pointer.
/// `greet(retptr, ptr, len)` stores `(ptr, len)` at `retptr`, so it returns
/// its string argument through the return pointer.
pub fn bindgen_module() -> Vec<u8> {
    let add_to_sp = [
        0x23, 0x00, // global.get 0
        0x20, 0x00, // local.get 0
        0x6a, // i32.add
        0x24, 0x00, // global.set 0
        0x23, 0x00, // global.get 0
    ];
    let malloc = [
        0x23, 0x01, // global.get 1
        0x23, 0x01, // global.get 1
        0x20, 0x00, // local.get 0
        0x6a, // i32.add
        0x24, 0x01, // global.set 1
    ];
    let greet = [
        0x20, 0x00, 0x20, 0x01, 0x36, 0x02, 0x00, // i32.store [retptr], ptr
        0x20, 0x00, 0x20, 0x02, 0x36, 0x02, 0x04, // i32.store [retptr + 4], len
    ];
    ModuleBuilder::new()
        .memory(1, None)
        .export_memory()
        .global_i32(true, 60_000)
        .global_i32(true, 1024)
        .func("__wbindgen_add_to_stack_pointer", &[I32], &[I32], &add_to_sp)
        .func("__wbindgen_malloc", &[I32, I32], &[I32], &malloc)
        .func("greet", &[I32, I32, I32], &[], &greet)
        .build()
}

/// Module with a bump allocator and a string-taking export.
///
/// Exports `alloc(len) -> ptr` (bump pointer in global 0 starting at 1024),
/// `str_len(ptr, len) -> len`, `first_byte(ptr, len) -> u8`, and
/// `echo(ptr, len) -> (ptr, len)`.
pub fn string_module() -> Vec<u8> {
    // alloc: old = g0; g0 = g0 + len; return old
    let alloc = [
        0x23, 0x00, // global.get 0
        0x23, 0x00, // global.get 0
        0x20, 0x00, // local.get 0
        0x6a, // i32.add
        0x24, 0x00, // global.set 0
    ];
    ModuleBuilder::new()
        .memory(1, None)
        .export_memory()
        .global_i32(true, 1024)
        .func("alloc", &[I32], &[I32], &alloc)
        .func("str_len", &[I32, I32], &[I32], &[0x20, 0x01])
        .func("first_byte", &[I32, I32], &[I32], &[0x20, 0x00, 0x2d, 0x00, 0x00])
        .func("echo", &[I32, I32], &[I32, I32], &[0x20, 0x00, 0x20, 0x01])
        .build()
}
