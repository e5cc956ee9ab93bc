//! Optional health check.
//!
//! One background task per registry that periodically retries Failed loads.
//! It runs only when started explicitly, holds the registry weakly, and is
//! aborted when stopped, replaced, or when the registry is dropped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;

use crate::registry::{ModuleRegistry, ModuleStatus};

impl ModuleRegistry {
    /// Start (or restart) the health check. Must be called from within a
    /// tokio runtime.
    pub fn start_health_check(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let retried = ModuleRegistry { inner }.retry_failed().await;
                if retried > 0 {
                    log::debug!("[health] retried {} failed modules", retried);
                }
            }
        });

        if let Some(previous) = self.inner.health.lock().replace(handle) {
            previous.abort();
        }
        log::info!("[health] started, interval {} ms", interval.as_millis());
    }

    pub fn stop_health_check(&self) -> bool {
        match self.inner.health.lock().take() {
            Some(handle) => {
                handle.abort();
                log::info!("[health] stopped");
                true
            }
            None => false,
        }
    }

    pub fn health_check_running(&self) -> bool {
        self.inner
            .health
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Invalidate and reload every Failed entry with a known location.
    /// Returns how many were retried.
    pub async fn retry_failed(&self) -> usize {
        let failed: Vec<(String, String)> = self
            .states()
            .into_iter()
            .filter(|s| s.status == ModuleStatus::Failed)
            .filter_map(|s| s.source_location.map(|loc| (s.name, loc)))
            .collect();

        let reloads = failed.iter().map(|(name, location)| async move {
            log::info!("[health] retrying {} from {}", name, location);
            self.invalidate(name);
            let state = self.load(name, location).await;
            log::info!("[health] {} is now {:?}", name, state.status);
        });
        join_all(reloads).await;
        failed.len()
    }
}
