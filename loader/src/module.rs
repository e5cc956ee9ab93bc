//! Static description of a loaded module.
//!
//! A [`ModuleDescriptor`] is produced by the validator once bytes are fetched
//! and the header is parsed. It is immutable afterwards and shared between the
//! registry, the resolver and the gateway, so exported names are enumerated
//! once at load time instead of being looked up on every call.

use serde::{Deserialize, Serialize};

/// Value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

impl ValueType {
    /// Whether values of this type can cross the host boundary as numbers.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueType::I32 | ValueType::I64 | ValueType::F32 | ValueType::F64
        )
    }
}

/// Function signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncSignature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FuncSignature {
    pub fn new(params: &[ValueType], results: &[ValueType]) -> Self {
        FuncSignature {
            params: params.to_vec(),
            results: results.to_vec(),
        }
    }
}

impl core::fmt::Display for FuncSignature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} -> {:?}", self.params, self.results)
    }
}

/// Memory limits in 64 KiB pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    pub min_pages: u32,
    pub max_pages: Option<u32>,
}

/// Import kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportKind {
    Function(FuncSignature),
    Memory(MemoryLimits),
    Table,
    Global,
}

/// A declared import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDecl {
    /// Import namespace (the "module" field of the binary).
    pub namespace: String,
    pub symbol: String,
    pub kind: ImportKind,
}

/// Export kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportKind {
    Function(FuncSignature),
    Table,
    Memory,
    Global,
}

/// A declared export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDecl {
    pub symbol: String,
    pub kind: ExportKind,
}

/// Identity and static facts about a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Logical key, e.g. `reasoning_engine`.
    pub name: String,
    /// Location the bytes were fetched from.
    pub source_location: String,
    pub byte_size: usize,
    /// FNV-1a 64-bit hash of the bytes, lower-case hex.
    pub content_hash: String,
    /// Binary format version from the header.
    pub version: u32,
    pub declared_imports: Vec<ImportDecl>,
    pub declared_exports: Vec<ExportDecl>,
    /// Defined or imported linear memory present.
    pub has_linear_memory: bool,
    /// Limits of the first memory, if any.
    pub memory: Option<MemoryLimits>,
    /// Whether the binary carries a start section.
    pub has_start_section: bool,
}

impl ModuleDescriptor {
    /// Find an exported function's signature.
    pub fn function(&self, name: &str) -> Option<&FuncSignature> {
        self.declared_exports.iter().find_map(|e| match &e.kind {
            ExportKind::Function(sig) if e.symbol == name => Some(sig),
            _ => None,
        })
    }

    /// Names of all exported functions, in declaration order.
    pub fn function_names(&self) -> Vec<String> {
        self.declared_exports
            .iter()
            .filter(|e| matches!(e.kind, ExportKind::Function(_)))
            .map(|e| e.symbol.clone())
            .collect()
    }

    /// Check whether a function with this name is exported.
    pub fn exports_function(&self, name: &str) -> bool {
        self.function(name).is_some()
    }
}

/// FNV-1a 64-bit content hash, formatted as 16 hex digits.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325; // FNV-1a offset
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3); // FNV-1a prime
    }
    format!("{hash:016x}")
}
