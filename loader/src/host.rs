//! Host functions for WASM modules.
//!
//! Provides the host side of the baseline helper symbols that compiled
//! modules expect: console passthrough, string handles, panic/throw
//! propagation, and no-op placeholders for symbols that glue code looks up
//! but never relies on.

use std::collections::VecDeque;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use wasmi::{Caller, Extern, Linker, Memory, Val};

use crate::engine::{func_type, zero_val};
use crate::module::{FuncSignature, ValueType};

/// Maximum captured console lines per instance.
const CONSOLE_CAPACITY: usize = 256;

/// Namespaces the helper catalogue answers for.
const HELPER_NAMESPACES: &[&str] = &[
    "env",
    "wbg",
    "console",
    "__wbindgen_placeholder__",
    "__wbindgen_externref_xform__",
];

bitflags! {
    /// Host capability groups offered to modules.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct HostFeatures: u32 {
        /// Console log/warn/error passthrough.
        const CONSOLE = 0b0_0001;
        /// String handles (`__wbindgen_string_new`, drop ref).
        const STRINGS = 0b0_0010;
        /// Throw/abort propagation as traps.
        const THROW = 0b0_0100;
        /// No-op stubs for speculative glue symbols.
        const PLACEHOLDERS = 0b0_1000;
        /// Host-created linear memory for `env.memory` imports.
        const HOST_MEMORY = 0b1_0000;
        /// Always enabled.
        const BASELINE = Self::CONSOLE.bits() | Self::STRINGS.bits() | Self::THROW.bits();
    }
}

impl Default for HostFeatures {
    fn default() -> Self {
        HostFeatures::all()
    }
}

/// A host helper implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostHelper {
    /// `(ptr, len)` UTF-8 text forwarded to the log facade.
    Console(log::Level),
    /// `(ptr, len)` message; always traps.
    Throw,
    /// AssemblyScript `abort(msg, file, line, col)`; always traps.
    Abort,
    /// `(ptr, len) -> handle`
    StringNew,
    /// `(handle)`
    DropRef,
    /// Adopts the declared signature and returns zeros.
    Placeholder,
}

impl HostHelper {
    /// Look up the helper serving `namespace::symbol`.
    pub fn lookup(namespace: &str, symbol: &str) -> Option<HostHelper> {
        if !HELPER_NAMESPACES.contains(&namespace) {
            return None;
        }

        let helper = match symbol {
            "log" | "console_log" => HostHelper::Console(log::Level::Info),
            "abort" if namespace == "env" => HostHelper::Abort,
            "__wbindgen_throw" => HostHelper::Throw,
            "__wbindgen_string_new" => HostHelper::StringNew,
            "__wbindgen_object_drop_ref" => HostHelper::DropRef,
            s if s.starts_with("__wbg___wbindgen_throw_") => HostHelper::Throw,
            s if s.starts_with("__wbg_log_") => HostHelper::Console(log::Level::Info),
            s if s.starts_with("__wbg_info_") => HostHelper::Console(log::Level::Info),
            s if s.starts_with("__wbg_debug_") => HostHelper::Console(log::Level::Debug),
            s if s.starts_with("__wbg_warn_") => HostHelper::Console(log::Level::Warn),
            s if s.starts_with("__wbg_error_") => HostHelper::Console(log::Level::Error),
            s if namespace != "env" && (s.starts_with("__wbindgen_") || s.starts_with("__wbg_")) => {
                HostHelper::Placeholder
            }
            _ => return None,
        };
        Some(helper)
    }

    /// Feature group the helper belongs to.
    pub fn feature(self) -> HostFeatures {
        match self {
            HostHelper::Console(_) => HostFeatures::CONSOLE,
            HostHelper::Throw | HostHelper::Abort => HostFeatures::THROW,
            HostHelper::StringNew | HostHelper::DropRef => HostFeatures::STRINGS,
            HostHelper::Placeholder => HostFeatures::PLACEHOLDERS,
        }
    }

    /// Signature the host implements. Fixed for real helpers; placeholders
    /// mirror whatever the module declared.
    pub fn signature(self, declared: &FuncSignature) -> FuncSignature {
        use ValueType::I32;
        match self {
            HostHelper::Console(_) | HostHelper::Throw => FuncSignature::new(&[I32, I32], &[]),
            HostHelper::Abort => FuncSignature::new(&[I32, I32, I32, I32], &[]),
            HostHelper::StringNew => FuncSignature::new(&[I32, I32], &[I32]),
            HostHelper::DropRef => FuncSignature::new(&[I32], &[]),
            HostHelper::Placeholder => declared.clone(),
        }
    }
}

/// Per-instance host state.
#[derive(Debug)]
pub struct HostState {
    /// Logical module name, for log lines.
    module: String,
    /// String heap behind `__wbindgen_string_new` handles.
    handles: Vec<Option<String>>,
    /// Last message raised by throw/abort.
    thrown: Option<String>,
    /// Captured console output, oldest first.
    console: VecDeque<String>,
    /// Host-provided memory, when the module imports one.
    pub(crate) memory: Option<Memory>,
}

impl HostState {
    pub fn new(module: &str) -> Self {
        HostState {
            module: String::from(module),
            handles: Vec::new(),
            thrown: None,
            console: VecDeque::with_capacity(CONSOLE_CAPACITY),
            memory: None,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Captured console lines.
    pub fn console(&self) -> &VecDeque<String> {
        &self.console
    }

    /// Take the message raised by the last throw, if any.
    pub fn take_thrown(&mut self) -> Option<String> {
        self.thrown.take()
    }

    /// Resolve a string handle.
    pub fn handle(&self, handle: i32) -> Option<&str> {
        usize::try_from(handle)
            .ok()
            .and_then(|idx| self.handles.get(idx))
            .and_then(|slot| slot.as_deref())
    }

    fn push_console(&mut self, level: log::Level, text: &str) {
        let target = format!("wasm::{}", self.module);
        log::log!(target: &target, level, "{}", text);
        if self.console.len() == CONSOLE_CAPACITY {
            self.console.pop_front();
        }
        self.console.push_back(String::from(text));
    }

    fn new_handle(&mut self, value: String) -> i32 {
        let slot = match self.handles.iter().position(Option::is_none) {
            Some(idx) => {
                self.handles[idx] = Some(value);
                idx
            }
            None => {
                self.handles.push(Some(value));
                self.handles.len() - 1
            }
        };
        slot as i32
    }

    fn drop_handle(&mut self, handle: i32) {
        if let Some(slot) = usize::try_from(handle)
            .ok()
            .and_then(|idx| self.handles.get_mut(idx))
        {
            *slot = None;
        }
    }
}

/// Register one helper under `namespace::symbol`.
pub(crate) fn define_helper(
    linker: &mut Linker<HostState>,
    namespace: &str,
    symbol: &str,
    helper: HostHelper,
    signature: &FuncSignature,
) -> Result<(), String> {
    let ty = func_type(signature).ok_or_else(|| {
        format!("{namespace}::{symbol}: unsupported value type in {signature}")
    })?;
    let results: Vec<ValueType> = signature.results.clone();
    let symbol_name = String::from(symbol);

    linker
        .func_new(
            namespace,
            symbol,
            ty,
            move |mut caller: Caller<'_, HostState>, params: &[Val], out: &mut [Val]| {
                match helper {
                    HostHelper::Console(level) => {
                        let text = read_text(&caller, param_i32(params, 0), param_i32(params, 1))?;
                        caller.data_mut().push_console(level, &text);
                    }
                    HostHelper::Throw => {
                        let text = read_text(&caller, param_i32(params, 0), param_i32(params, 1))
                            .unwrap_or_else(|_| String::from("<unreadable message>"));
                        caller.data_mut().thrown = Some(text.clone());
                        return Err(wasmi::Error::new(format!("module threw: {text}")));
                    }
                    HostHelper::Abort => {
                        let text = format!(
                            "abort at line {} column {}",
                            param_i32(params, 2),
                            param_i32(params, 3)
                        );
                        caller.data_mut().thrown = Some(text.clone());
                        return Err(wasmi::Error::new(text));
                    }
                    HostHelper::StringNew => {
                        let text = read_text(&caller, param_i32(params, 0), param_i32(params, 1))?;
                        let handle = caller.data_mut().new_handle(text);
                        if let Some(slot) = out.first_mut() {
                            *slot = Val::I32(handle);
                        }
                    }
                    HostHelper::DropRef => caller.data_mut().drop_handle(param_i32(params, 0)),
                    HostHelper::Placeholder => {
                        log::trace!(
                            "[host] {} called placeholder {}",
                            caller.data().module,
                            symbol_name
                        );
                        for (slot, ty) in out.iter_mut().zip(results.iter()) {
                            *slot = zero_val(*ty);
                        }
                    }
                }
                Ok(())
            },
        )
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn param_i32(params: &[Val], idx: usize) -> i32 {
    match params.get(idx) {
        Some(Val::I32(v)) => *v,
        _ => 0,
    }
}

/// Memory the caller can see: host-provided first, then the `memory` export.
fn caller_memory(caller: &Caller<'_, HostState>) -> Option<Memory> {
    caller
        .data()
        .memory
        .or_else(|| caller.get_export("memory").and_then(Extern::into_memory))
}

fn read_text(caller: &Caller<'_, HostState>, ptr: i32, len: i32) -> Result<String, wasmi::Error> {
    let memory =
        caller_memory(caller).ok_or_else(|| wasmi::Error::new("module has no linear memory"))?;
    let data = memory.data(caller);
    let start = ptr as u32 as usize;
    let end = start
        .checked_add(len as u32 as usize)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            wasmi::Error::new(format!(
                "host read out of bounds: {start} + {len} > {}",
                data.len()
            ))
        })?;
    Ok(String::from_utf8_lossy(&data[start..end]).into_owned())
}
