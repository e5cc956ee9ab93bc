//! Execution engine setup and value type conversions.

use wasmi::core::ValType;
use wasmi::{ExternRef, FuncRef, FuncType, Val};

use crate::config::LoaderConfig;
use crate::module::{FuncSignature, ValueType};

/// Build the engine shared by the validator and the instantiator.
///
/// Fuel metering is enabled only when a per-call budget is configured.
pub fn build_engine(config: &LoaderConfig) -> wasmi::Engine {
    let mut engine_config = wasmi::Config::default();
    engine_config.consume_fuel(config.fuel_per_call.is_some());
    wasmi::Engine::new(&engine_config)
}

/// Engine value type for a declared type. `None` for types the engine
/// cannot represent.
pub fn to_val_type(ty: ValueType) -> Option<ValType> {
    match ty {
        ValueType::I32 => Some(ValType::I32),
        ValueType::I64 => Some(ValType::I64),
        ValueType::F32 => Some(ValType::F32),
        ValueType::F64 => Some(ValType::F64),
        ValueType::FuncRef => Some(ValType::FuncRef),
        ValueType::ExternRef => Some(ValType::ExternRef),
        ValueType::V128 => None,
    }
}

pub fn func_type(sig: &FuncSignature) -> Option<FuncType> {
    let params = sig
        .params
        .iter()
        .map(|t| to_val_type(*t))
        .collect::<Option<Vec<_>>>()?;
    let results = sig
        .results
        .iter()
        .map(|t| to_val_type(*t))
        .collect::<Option<Vec<_>>>()?;
    Some(FuncType::new(params, results))
}

/// Zero (or null) value of a type.
pub fn zero_val(ty: ValueType) -> Val {
    match ty {
        ValueType::I32 | ValueType::V128 => Val::I32(0),
        ValueType::I64 => Val::I64(0),
        ValueType::F32 => Val::F32(0.0f32.into()),
        ValueType::F64 => Val::F64(0.0f64.into()),
        ValueType::FuncRef => Val::FuncRef(FuncRef::null()),
        ValueType::ExternRef => Val::ExternRef(ExternRef::null()),
    }
}

/// Result buffer sized and typed for a signature.
pub fn result_buffer(sig: &FuncSignature) -> Vec<Val> {
    sig.results.iter().map(|t| zero_val(*t)).collect()
}

/// Whether the engine error text describes a failed memory allocation.
pub(crate) fn is_memory_failure(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("out of memory")
        || m.contains("memory allocation")
        || m.contains("failed to allocate")
        || (m.contains("memory") && m.contains("limit"))
}
