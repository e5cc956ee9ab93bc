//! Loader configuration.
//!
//! `LoaderConfig` can be built in code (it implements `Default`) or read from
//! a TOML document:
//!
//! ```toml
//! load_timeout_ms = 5000
//! max_memory_pages = 128
//! fuel_per_call = 10000000
//! host_features = "CONSOLE | STRINGS | THROW | PLACEHOLDERS"
//!
//! [[modules]]
//! name = "reasoning_engine"
//! path = "/wasm/reasoning_engine.wasm"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::host::HostFeatures;

/// One manifest entry: a logical name and where its bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    pub path: String,
}

impl ModuleEntry {
    pub fn new(name: &str, path: &str) -> Self {
        ModuleEntry {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Per-load deadline covering fetch through instantiation.
    pub load_timeout_ms: u64,
    /// Maximum linear memory per instance (in pages, 64KB each).
    pub max_memory_pages: u32,
    /// Fuel granted to every call. `None` disables metering.
    pub fuel_per_call: Option<u64>,
    /// Accepted binary format versions.
    pub supported_versions: Vec<u32>,
    /// Host capability groups offered to modules.
    pub host_features: HostFeatures,
    /// Outcomes kept per module in diagnostics.
    pub diagnostics_history: usize,
    /// Interval for the optional failed-load health check.
    pub health_check_interval_ms: Option<u64>,
    /// Modules a consumer should load at startup.
    pub modules: Vec<ModuleEntry>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            load_timeout_ms: 10_000,
            max_memory_pages: 256, // 16 MB
            fuel_per_call: None,
            supported_versions: vec![1],
            host_features: HostFeatures::default(),
            diagnostics_history: 8,
            health_check_interval_ms: None,
            modules: Vec::new(),
        }
    }
}

impl LoaderConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: LoaderConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_timeout_ms == 0 {
            return Err(ConfigError::Invalid("load_timeout_ms must be positive".into()));
        }
        if self.supported_versions.is_empty() {
            return Err(ConfigError::Invalid(
                "supported_versions must not be empty".into(),
            ));
        }
        if self.health_check_interval_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "health_check_interval_ms must be positive".into(),
            ));
        }
        for (i, entry) in self.modules.iter().enumerate() {
            if entry.name.is_empty() {
                return Err(ConfigError::Invalid(format!("module #{i} has an empty name")));
            }
            if self.modules[..i].iter().any(|e| e.name == entry.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate module name '{}'",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        self.health_check_interval_ms.map(Duration::from_millis)
    }

    /// Features actually offered: the configured set plus the baseline.
    pub fn effective_features(&self) -> HostFeatures {
        self.host_features | HostFeatures::BASELINE
    }
}
