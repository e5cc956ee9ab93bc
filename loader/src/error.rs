//! Error taxonomy for every loading and invocation stage.
//!
//! Each stage returns its own tagged error; nothing is thrown past a stage
//! boundary. The registry folds the first failing stage into a [`LoadError`]
//! and keeps it in the module's state and diagnostics.

use serde::{Deserialize, Serialize};

use crate::registry::ModuleStatus;

// ── Validator ────────────────────────────────────────────────────────

/// Binary Validator failures. The source bytes are not a usable module.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{}", too_small_message(*len))]
    TooSmall { len: usize },

    #[error("bad magic: expected 00 61 73 6d, observed {}{}", hex(observed), hint.map(|h| format!(" ({h})")).unwrap_or_default())]
    BadMagic {
        observed: [u8; 4],
        hint: Option<&'static str>,
    },

    #[error("unsupported binary version {version}")]
    UnsupportedVersion { version: u32 },

    #[error("malformed module: {message}")]
    MalformedModule { message: String },
}

fn too_small_message(len: usize) -> String {
    if len == 0 {
        String::from("empty response: 0 bytes, a module needs at least 8")
    } else {
        format!("binary too small: {len} bytes, a module needs at least 8")
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Resolver ─────────────────────────────────────────────────────────

/// Import Resolver failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unresolved import {namespace}::{symbol}")]
    UnresolvedImport { namespace: String, symbol: String },
}

// ── Instantiator ─────────────────────────────────────────────────────

/// Module Instantiator failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InstantiationError {
    /// Import/export mismatch found while linking.
    #[error("link error: {0}")]
    LinkError(String),

    /// The module linked but its own start routine trapped.
    #[error("trap during start: {0}")]
    TrapOnStart(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

// ── Fetch boundary ───────────────────────────────────────────────────

/// Byte source failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("module source not found: {location}")]
    NotFound { location: String },

    #[error("failed to read {location}: {message}")]
    Io { location: String, message: String },
}

// ── Registry ─────────────────────────────────────────────────────────

/// Pipeline stage that produced a load failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadStage {
    Fetch,
    Validator,
    Resolver,
    Instantiator,
    Registry,
}

/// First failure of a load attempt, tagged with its stage.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Instantiation(#[from] InstantiationError),

    #[error("load timed out after {after_ms} ms")]
    LoadTimeout { after_ms: u64 },
}

impl LoadError {
    /// Stage that produced this error.
    pub fn stage(&self) -> LoadStage {
        match self {
            LoadError::Fetch(_) => LoadStage::Fetch,
            LoadError::Validation(_) => LoadStage::Validator,
            LoadError::Resolve(_) => LoadStage::Resolver,
            LoadError::Instantiation(_) => LoadStage::Instantiator,
            LoadError::LoadTimeout { .. } => LoadStage::Registry,
        }
    }

    /// Stable tag naming the specific failure.
    pub fn tag(&self) -> &'static str {
        match self {
            LoadError::Fetch(FetchError::NotFound { .. }) => "NotFound",
            LoadError::Fetch(FetchError::Io { .. }) => "FetchIo",
            LoadError::Validation(ValidationError::TooSmall { .. }) => "TooSmall",
            LoadError::Validation(ValidationError::BadMagic { .. }) => "BadMagic",
            LoadError::Validation(ValidationError::UnsupportedVersion { .. }) => {
                "UnsupportedVersion"
            }
            LoadError::Validation(ValidationError::MalformedModule { .. }) => "MalformedModule",
            LoadError::Resolve(ResolveError::UnresolvedImport { .. }) => "UnresolvedImport",
            LoadError::Instantiation(InstantiationError::LinkError(_)) => "LinkError",
            LoadError::Instantiation(InstantiationError::TrapOnStart(_)) => "TrapOnStart",
            LoadError::Instantiation(InstantiationError::OutOfMemory(_)) => "OutOfMemory",
            LoadError::LoadTimeout { .. } => "LoadTimeout",
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────────

/// Kind of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationErrorKind {
    ModuleNotLoaded,
    FunctionNotFound,
    ArgumentError,
    RuntimeTrap,
}

/// A failed gateway call. Always returned, never raised.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("module '{module}' is not loaded (status: {status:?})")]
    ModuleNotLoaded {
        module: String,
        status: Option<ModuleStatus>,
    },

    #[error("function '{function}' not found in '{module}'; available: [{}]", available.join(", "))]
    FunctionNotFound {
        module: String,
        function: String,
        available: Vec<String>,
    },

    #[error("bad arguments for '{function}': {message}")]
    ArgumentError { function: String, message: String },

    #[error("'{function}' trapped: {message}")]
    RuntimeTrap { function: String, message: String },
}

impl InvocationError {
    pub fn kind(&self) -> InvocationErrorKind {
        match self {
            InvocationError::ModuleNotLoaded { .. } => InvocationErrorKind::ModuleNotLoaded,
            InvocationError::FunctionNotFound { .. } => InvocationErrorKind::FunctionNotFound,
            InvocationError::ArgumentError { .. } => InvocationErrorKind::ArgumentError,
            InvocationError::RuntimeTrap { .. } => InvocationErrorKind::RuntimeTrap,
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Configuration loading errors.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
