//! Call arguments and classified results.

use serde::{Deserialize, Serialize};
use wasmi::Val;

use crate::module::ValueType;

/// 2^24: integers up to this magnitude are exact in an f32.
const F32_EXACT_INT: i64 = 1 << 24;

/// An argument to an exported function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    /// UTF-8 text, passed as `(ptr, byte_len)`.
    Str(String),
    /// Raw bytes, passed as `(ptr, byte_len)`.
    Bytes(Vec<u8>),
    /// Little-endian f32 array, passed as `(ptr, element_count)`.
    F32Slice(Vec<f32>),
    /// Serialized to JSON text, passed like [`Arg::Str`].
    Json(serde_json::Value),
}

impl Arg {
    /// Number of parameters this argument occupies.
    pub fn width(&self) -> usize {
        if self.is_region() {
            2
        } else {
            1
        }
    }

    /// Whether the argument is copied into linear memory.
    pub fn is_region(&self) -> bool {
        matches!(
            self,
            Arg::Str(_) | Arg::Bytes(_) | Arg::F32Slice(_) | Arg::Json(_)
        )
    }

    /// Bytes to copy, the length to pass, and the alignment to request.
    pub(crate) fn region(&self) -> Option<(Vec<u8>, usize, u32)> {
        match self {
            Arg::Str(s) => Some((s.as_bytes().to_vec(), s.len(), 1)),
            Arg::Bytes(b) => Some((b.clone(), b.len(), 1)),
            Arg::Json(v) => {
                let text = v.to_string();
                let len = text.len();
                Some((text.into_bytes(), len, 1))
            }
            Arg::F32Slice(values) => {
                let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                Some((bytes, values.len(), 4))
            }
            _ => None,
        }
    }

    /// Scalar argument coerced to `ty` when no information is lost.
    pub(crate) fn to_val(&self, ty: ValueType) -> Result<Val, String> {
        let mismatch = || format!("cannot pass {} as {:?}", self.kind_name(), ty);
        let val = match (self, ty) {
            (Arg::I32(v), ValueType::I32) => Val::I32(*v),
            (Arg::I32(v), ValueType::I64) => Val::I64(i64::from(*v)),
            (Arg::I32(v), ValueType::F64) => Val::F64(f64::from(*v).into()),
            (Arg::I32(v), ValueType::F32) if i64::from(*v).abs() <= F32_EXACT_INT => {
                Val::F32((*v as f32).into())
            }
            (Arg::I64(v), ValueType::I64) => Val::I64(*v),
            (Arg::I64(v), ValueType::I32) => Val::I32(i32::try_from(*v).map_err(|_| mismatch())?),
            (Arg::Bool(b), ValueType::I32) => Val::I32(i32::from(*b)),
            (Arg::Bool(b), ValueType::I64) => Val::I64(i64::from(*b)),
            (Arg::F32(v), ValueType::F32) => Val::F32((*v).into()),
            (Arg::F32(v), ValueType::F64) => Val::F64(f64::from(*v).into()),
            (Arg::F64(v), ValueType::F64) => Val::F64((*v).into()),
            (Arg::F64(v), ValueType::F32) if (*v as f32) as f64 == *v => Val::F32((*v as f32).into()),
            (Arg::F64(v), ValueType::I32)
                if v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64 =>
            {
                Val::I32(*v as i32)
            }
            _ => return Err(mismatch()),
        };
        Ok(val)
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Arg::I32(_) => "i32",
            Arg::I64(_) => "i64",
            Arg::F32(_) => "f32",
            Arg::F64(_) => "f64",
            Arg::Bool(_) => "bool",
            Arg::Str(_) => "string",
            Arg::Bytes(_) => "bytes",
            Arg::F32Slice(_) => "f32 slice",
            Arg::Json(_) => "json",
        }
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::I32(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::I64(v)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::F32(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::F64(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.into())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Bytes(v)
    }
}

impl From<serde_json::Value> for Arg {
    fn from(v: serde_json::Value) -> Self {
        Arg::Json(v)
    }
}

/// How to interpret a function's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReturnShape {
    #[default]
    Auto,
    /// A single i32 is a boolean (non-zero is true).
    Bool,
    /// Memory regions stay raw bytes.
    Bytes,
    /// Results exactly as the function returned them. Nothing is read
    /// from memory.
    Raw,
}

/// A classified successful result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Unit,
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    /// A reference the host cannot look into.
    Opaque,
    Tuple(Vec<Value>),
}

impl Value {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(f64::from(*v)),
            Value::I64(v) => Some(*v as f64),
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    /// JSON rendering for consumers that forward results.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Unit | Value::Opaque => J::Null,
            Value::I32(v) => J::from(*v),
            Value::I64(v) => J::from(*v),
            Value::F32(v) => J::from(f64::from(*v)),
            Value::F64(v) => J::from(*v),
            Value::Bool(b) => J::Bool(*b),
            Value::Text(s) => J::String(s.clone()),
            Value::Json(v) => v.clone(),
            Value::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Value::Tuple(items) => J::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

/// Classify a single engine value.
pub(crate) fn from_val(val: &Val) -> Value {
    match val {
        Val::I32(v) => Value::I32(*v),
        Val::I64(v) => Value::I64(*v),
        Val::F32(v) => Value::F32(v.to_float()),
        Val::F64(v) => Value::F64(v.to_float()),
        Val::FuncRef(_) | Val::ExternRef(_) => Value::Opaque,
    }
}

/// Classify bytes read from linear memory.
pub(crate) fn from_region(bytes: Vec<u8>, shape: ReturnShape) -> Value {
    if shape == ReturnShape::Bytes {
        return Value::Bytes(bytes);
    }
    match String::from_utf8(bytes) {
        Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) if json.is_object() || json.is_array() => Value::Json(json),
            _ => Value::Text(text),
        },
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}
