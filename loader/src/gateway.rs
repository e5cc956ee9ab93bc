//! Safe Invocation Gateway.
//!
//! The only path by which exported functions are called. Every call returns a
//! [`InvocationResult`]; traps and host-raised errors are caught and turned
//! into [`InvocationError::RuntimeTrap`], and the module stays Ready.
//!
//! # Marshalling
//!
//! Scalars pass directly. Strings, bytes, f32 slices and JSON are copied into
//! linear memory through the module's allocator and passed as `(ptr, len)`.
//! Functions using the wasm-bindgen return pointer, i.e. taking one hidden
//! leading parameter and returning nothing, get a 16-byte slot on the shadow
//! stack and have their `(ptr, len)` result read back from it.

use wasmi::{Memory, Store, Val};

use crate::engine::result_buffer;
use crate::error::InvocationError;
use crate::host::HostState;
use crate::instance::ModuleInstance;
use crate::module::{FuncSignature, ModuleDescriptor, ValueType};
use crate::registry::ModuleRegistry;
use crate::value::{from_region, from_val, Arg, ReturnShape, Value};

pub const MALLOC_EXPORT: &str = "__wbindgen_malloc";
pub const FREE_EXPORT: &str = "__wbindgen_free";
pub const STACK_POINTER_EXPORT: &str = "__wbindgen_add_to_stack_pointer";

/// Plain allocators tried when the bindgen one is absent: `name(len) -> ptr`.
const PLAIN_ALLOCATORS: &[&str] = &["alloc", "malloc"];

/// Shadow stack slot reserved for a return pointer.
const RETPTR_SLOT: i32 = 16;

pub type InvocationResult = Result<Value, InvocationError>;

#[derive(Debug, Clone)]
pub struct Gateway {
    registry: ModuleRegistry,
}

impl Gateway {
    pub fn new(registry: ModuleRegistry) -> Self {
        Gateway { registry }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Call `function` on a Ready module. Never triggers a load.
    pub fn invoke(&self, module: &str, function: &str, args: &[Arg]) -> InvocationResult {
        self.invoke_as(module, function, args, ReturnShape::Auto)
    }

    pub fn invoke_as(
        &self,
        module: &str,
        function: &str,
        args: &[Arg],
        shape: ReturnShape,
    ) -> InvocationResult {
        let instance = match self.registry.instance(module) {
            Some(instance) => instance,
            None => {
                return Err(InvocationError::ModuleNotLoaded {
                    module: module.into(),
                    status: self.registry.get(module).map(|s| s.status),
                })
            }
        };

        let descriptor = instance.descriptor().clone();
        let Some(signature) = descriptor.function(function) else {
            return Err(InvocationError::FunctionNotFound {
                module: module.into(),
                function: function.into(),
                available: descriptor.function_names(),
            });
        };

        let result = call(&instance, &descriptor, function, signature, args, shape);
        match &result {
            Ok(value) => log::debug!("[gateway] {}::{} -> {:?}", module, function, value),
            Err(e) => log::warn!("[gateway] {}::{} failed: {}", module, function, e),
        }
        result
    }
}

fn call(
    instance: &ModuleInstance,
    descriptor: &ModuleDescriptor,
    function: &str,
    signature: &FuncSignature,
    args: &[Arg],
    shape: ReturnShape,
) -> InvocationResult {
    let supplied: usize = args.iter().map(Arg::width).sum();
    let uses_retptr = signature.results.is_empty()
        && signature.params.len() == supplied + 1
        && signature.params.first() == Some(&ValueType::I32)
        && descriptor.exports_function(STACK_POINTER_EXPORT);

    if !uses_retptr && signature.params.len() != supplied {
        return Err(argument_error(
            function,
            format!(
                "expected {} parameters, got {} ({})",
                signature.params.len(),
                supplied,
                signature
            ),
        ));
    }

    instance.with_store(|store, handle| {
        let mut invocation = Call {
            store,
            instance: handle,
            descriptor,
            function,
        };
        invocation.run(signature, args, shape, uses_retptr)
    })
}

struct Call<'a> {
    store: &'a mut Store<HostState>,
    instance: &'a wasmi::Instance,
    descriptor: &'a ModuleDescriptor,
    function: &'a str,
}

impl Call<'_> {
    fn run(
        &mut self,
        signature: &FuncSignature,
        args: &[Arg],
        shape: ReturnShape,
        uses_retptr: bool,
    ) -> InvocationResult {
        let func = self
            .instance
            .get_func(&*self.store, self.function)
            .ok_or_else(|| InvocationError::FunctionNotFound {
                module: self.descriptor.name.clone(),
                function: self.function.into(),
                available: self.descriptor.function_names(),
            })?;

        let mut params = Vec::with_capacity(signature.params.len());
        let retptr = if uses_retptr {
            let ptr = self.helper_i32(STACK_POINTER_EXPORT, &[Val::I32(-RETPTR_SLOT)])?;
            params.push(Val::I32(ptr));
            Some(ptr)
        } else {
            None
        };

        let outcome = self
            .marshal(&signature.params[params.len()..], args, &mut params)
            .and_then(|()| {
                let mut results = result_buffer(signature);
                func.call(&mut *self.store, &params, &mut results)
                    .map_err(|e| self.trap(e))?;
                Ok(results)
            });

        let Some(retptr) = retptr else {
            return outcome.map(|results| self.classify(&results, shape));
        };

        let read = outcome.and_then(|_| self.read_retptr(retptr, shape));
        // The stack pointer is restored even if the call trapped.
        let restored = self.helper_i32(STACK_POINTER_EXPORT, &[Val::I32(RETPTR_SLOT)]);
        let value = read?;
        restored?;
        Ok(value)
    }

    fn marshal(
        &mut self,
        param_types: &[ValueType],
        args: &[Arg],
        out: &mut Vec<Val>,
    ) -> Result<(), InvocationError> {
        let mut types = param_types.iter().copied();
        for arg in args {
            match arg.region() {
                Some((bytes, len, align)) => {
                    let (pt, lt) = (types.next(), types.next());
                    if pt != Some(ValueType::I32) || lt != Some(ValueType::I32) {
                        return Err(argument_error(
                            self.function,
                            format!("region argument needs two i32 parameters, found {pt:?}, {lt:?}"),
                        ));
                    }
                    let ptr = self.copy_in(&bytes, align)?;
                    let len = i32::try_from(len).map_err(|_| {
                        argument_error(self.function, "argument too large".into())
                    })?;
                    out.push(Val::I32(ptr));
                    out.push(Val::I32(len));
                }
                None => {
                    let ty = types.next().ok_or_else(|| {
                        argument_error(self.function, "too many arguments".into())
                    })?;
                    let val = arg
                        .to_val(ty)
                        .map_err(|message| argument_error(self.function, message))?;
                    out.push(val);
                }
            }
        }
        Ok(())
    }

    /// Allocate in the module and copy `bytes` there.
    fn copy_in(&mut self, bytes: &[u8], align: u32) -> Result<i32, InvocationError> {
        let memory = self.memory().ok_or_else(|| {
            argument_error(self.function, "module exports no linear memory".into())
        })?;
        let size = Val::I32(bytes.len() as i32);

        let ptr = match self.descriptor.function(MALLOC_EXPORT).map(|s| s.params.len()) {
            Some(2) => self.helper_i32(MALLOC_EXPORT, &[size, Val::I32(align as i32)])?,
            Some(1) => self.helper_i32(MALLOC_EXPORT, &[size])?,
            _ => {
                let name = PLAIN_ALLOCATORS
                    .iter()
                    .find(|name| {
                        self.descriptor
                            .function(name)
                            .is_some_and(|s| s.params == [ValueType::I32] && s.results == [ValueType::I32])
                    })
                    .ok_or_else(|| {
                        argument_error(
                            self.function,
                            "module exports no allocator for string or byte arguments".into(),
                        )
                    })?;
                self.helper_i32(name, &[size])?
            }
        };

        memory
            .write(&mut *self.store, ptr as u32 as usize, bytes)
            .map_err(|e| argument_error(self.function, format!("copy into memory failed: {e}")))?;
        Ok(ptr)
    }

    fn memory(&self) -> Option<Memory> {
        self.instance
            .get_memory(&*self.store, "memory")
            .or(self.store.data().memory)
    }

    fn read_region(&self, ptr: i32, len: i32) -> Option<Vec<u8>> {
        let memory = self.memory()?;
        let data = memory.data(&*self.store);
        let start = ptr as u32 as usize;
        let end = start.checked_add(len as u32 as usize)?;
        data.get(start..end).map(<[u8]>::to_vec)
    }

    fn read_retptr(&mut self, retptr: i32, shape: ReturnShape) -> InvocationResult {
        let pair = self.read_region(retptr, 8).ok_or_else(|| InvocationError::RuntimeTrap {
            function: self.function.into(),
            message: "return pointer outside linear memory".into(),
        })?;
        let ptr = i32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
        let len = i32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
        if shape == ReturnShape::Raw {
            return Ok(Value::Tuple(vec![Value::I32(ptr), Value::I32(len)]));
        }
        let bytes = self.read_region(ptr, len).ok_or_else(|| InvocationError::RuntimeTrap {
            function: self.function.into(),
            message: format!("result region {ptr:#x}+{len} outside linear memory"),
        })?;

        if let Some(free) = self.descriptor.function(FREE_EXPORT) {
            let mut free_args = vec![Val::I32(ptr), Val::I32(len)];
            if free.params.len() == 3 {
                free_args.push(Val::I32(1));
            }
            if free.params.len() == free_args.len() {
                self.helper(FREE_EXPORT, &free_args)?;
            }
        }
        Ok(from_region(bytes, shape))
    }

    fn classify(&self, results: &[Val], shape: ReturnShape) -> Value {
        match results {
            [] => Value::Unit,
            [Val::I32(v)] if shape == ReturnShape::Bool => Value::Bool(*v != 0),
            [single] => from_val(single),
            [Val::I32(ptr), Val::I32(len)] if self.reads_region(shape, *len) => {
                match self.read_region(*ptr, *len) {
                    Some(bytes) => from_region(bytes, shape),
                    None => Value::Tuple(vec![Value::I32(*ptr), Value::I32(*len)]),
                }
            }
            many => Value::Tuple(many.iter().map(from_val).collect()),
        }
    }

    /// Whether an `(i32, i32)` result is read as a `(ptr, len)` region.
    /// `Auto` needs a non-empty region and a module that ships allocator or
    /// bindgen glue; plain modules keep their numbers.
    fn reads_region(&self, shape: ReturnShape, len: i32) -> bool {
        match shape {
            ReturnShape::Raw => false,
            ReturnShape::Bytes => true,
            ReturnShape::Auto | ReturnShape::Bool => {
                len > 0
                    && [MALLOC_EXPORT, FREE_EXPORT, STACK_POINTER_EXPORT]
                        .iter()
                        .chain(PLAIN_ALLOCATORS)
                        .any(|name| self.descriptor.exports_function(name))
            }
        }
    }

    /// Call a module-internal helper export.
    fn helper(&mut self, name: &str, args: &[Val]) -> Result<Vec<Val>, InvocationError> {
        let sig = self.descriptor.function(name).ok_or_else(|| {
            argument_error(self.function, format!("module does not export {name}"))
        })?;
        let func = self
            .instance
            .get_func(&*self.store, name)
            .ok_or_else(|| argument_error(self.function, format!("module does not export {name}")))?;
        let mut results = result_buffer(sig);
        func.call(&mut *self.store, args, &mut results)
            .map_err(|e| self.trap(e))?;
        Ok(results)
    }

    fn helper_i32(&mut self, name: &str, args: &[Val]) -> Result<i32, InvocationError> {
        match self.helper(name, args)?.first() {
            Some(Val::I32(v)) => Ok(*v),
            _ => Err(argument_error(
                self.function,
                format!("{name} did not return an i32"),
            )),
        }
    }

    fn trap(&mut self, error: wasmi::Error) -> InvocationError {
        let message = self
            .store
            .data_mut()
            .take_thrown()
            .unwrap_or_else(|| error.to_string());
        InvocationError::RuntimeTrap {
            function: self.function.into(),
            message,
        }
    }
}

fn argument_error(function: &str, message: String) -> InvocationError {
    InvocationError::ArgumentError {
        function: function.into(),
        message,
    }
}
