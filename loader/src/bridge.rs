//! Consumer bridge.
//!
//! A thin layer for agents that want "call this, or tell me why not": it
//! loads a manifest of modules up front and reports degraded operation
//! explicitly instead of substituting results.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;

use crate::config::{LoaderConfig, ModuleEntry};
use crate::gateway::Gateway;
use crate::registry::{Availability, ModuleRegistry, ModuleStatus};
use crate::source::ByteSource;
use crate::value::{Arg, ReturnShape, Value};

/// Outcome of loading a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Names that reached Ready, in manifest order.
    pub ready: Vec<String>,
    /// `(name, reason)` for every entry that did not.
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    pub fn all_ready(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Reply to a bridged call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeReply {
    /// The module answered.
    Module { value: Value },
    /// No module answer; `reason` says why.
    Degraded { reason: String },
}

impl BridgeReply {
    pub fn is_degraded(&self) -> bool {
        matches!(self, BridgeReply::Degraded { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            BridgeReply::Module { value } => Some(value),
            BridgeReply::Degraded { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleBridge {
    gateway: Gateway,
}

impl ModuleBridge {
    pub fn new(registry: ModuleRegistry) -> Self {
        ModuleBridge {
            gateway: Gateway::new(registry),
        }
    }

    /// Build a registry from `config` and start its health check if an
    /// interval is configured. Must be called from within a tokio runtime
    /// in that case.
    pub fn from_config(config: LoaderConfig, source: Arc<dyn ByteSource>) -> Self {
        let interval = config.health_check_interval();
        let registry = ModuleRegistry::new(config, source);
        if let Some(interval) = interval {
            registry.start_health_check(interval);
        }
        Self::new(registry)
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn registry(&self) -> &ModuleRegistry {
        self.gateway.registry()
    }

    /// Load every entry concurrently.
    pub async fn load_manifest(&self, entries: &[ModuleEntry]) -> LoadReport {
        let registry = self.registry();
        let states = join_all(
            entries
                .iter()
                .map(|entry| registry.load(&entry.name, &entry.path)),
        )
        .await;

        let mut report = LoadReport::default();
        for state in states {
            match state.status {
                ModuleStatus::Ready => report.ready.push(state.name),
                status => {
                    let reason = state
                        .last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| format!("module is {status:?}"));
                    report.failed.push((state.name, reason));
                }
            }
        }

        log::info!(
            "[bridge] manifest loaded: {} ready, {} failed",
            report.ready.len(),
            report.failed.len()
        );
        report
    }

    /// Load the manifest from the registry's own configuration.
    pub async fn load_configured(&self) -> LoadReport {
        let entries = self.registry().config().modules.clone();
        self.load_manifest(&entries).await
    }

    pub fn call(&self, module: &str, function: &str, args: &[Arg]) -> BridgeReply {
        self.call_as(module, function, args, ReturnShape::Auto)
    }

    pub fn call_as(
        &self,
        module: &str,
        function: &str,
        args: &[Arg],
        shape: ReturnShape,
    ) -> BridgeReply {
        match self.gateway.invoke_as(module, function, args, shape) {
            Ok(value) => BridgeReply::Module { value },
            Err(e) => {
                log::debug!("[bridge] {}::{} degraded: {}", module, function, e);
                BridgeReply::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn availability(&self) -> Availability {
        self.registry().availability()
    }
}
