//! Load diagnostics.
//!
//! One [`LoadDiagnostics`] per module name, kept by the registry across
//! invalidations so that repeated failures stay visible.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadStage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Ready,
    ReadyWithWarning {
        warning: String,
    },
    Failed {
        stage: LoadStage,
        tag: String,
        message: String,
    },
}

impl LoadOutcome {
    pub fn failed(error: &LoadError) -> Self {
        LoadOutcome::Failed {
            stage: error.stage(),
            tag: error.tag().into(),
            message: error.to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self, LoadOutcome::Failed { .. })
    }
}

/// One finished load attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRecord {
    /// 1-based attempt number for this name.
    pub attempt: u64,
    pub source_location: String,
    /// Present once bytes were fetched.
    pub byte_size: Option<usize>,
    pub content_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: LoadOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDiagnostics {
    pub name: String,
    /// Attempts started, including one still in flight.
    pub attempts: u64,
    /// Finished attempts, oldest first, bounded by the configured history.
    pub history: VecDeque<LoadRecord>,
}

impl LoadDiagnostics {
    pub(crate) fn new(name: &str) -> Self {
        LoadDiagnostics {
            name: name.into(),
            attempts: 0,
            history: VecDeque::new(),
        }
    }

    /// Latest finished attempt.
    pub fn last(&self) -> Option<&LoadRecord> {
        self.history.back()
    }

    /// Number of failed attempts still in history.
    pub fn failures(&self) -> usize {
        self.history.iter().filter(|r| !r.outcome.is_ready()).count()
    }

    pub(crate) fn begin_attempt(&mut self) -> u64 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn record(&mut self, record: LoadRecord, capacity: usize) {
        self.history.push_back(record);
        while self.history.len() > capacity.max(1) {
            self.history.pop_front();
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
