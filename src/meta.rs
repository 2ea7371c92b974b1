//! Run metadata threaded through every step of a generation.
//!
//! [`RunMeta`] is copy-on-write: every update consumes the value and returns
//! the next one, so a step never observes a half-updated view.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Crate version reported in every [`RunMeta`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub version: String,
    pub model: String,
    /// Accumulated cost in dollars, across modules, chain hops and retries.
    pub cost: f64,
    /// Retries performed so far (0 on the first attempt).
    pub retries: u32,
    /// Last outcome of each module, keyed by registry key.
    pub process: BTreeMap<String, ProcessInfo>,
}

impl RunMeta {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            version: VERSION.to_string(),
            model: model.into(),
            cost: 0.0,
            retries: 0,
            process: BTreeMap::new(),
        }
    }

    /// Add `delta` dollars to the running cost.
    pub fn with_cost_added(mut self, delta: f64) -> Self {
        self.cost += delta;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Record a module outcome, replacing any earlier one for the same key.
    pub fn with_process(mut self, key: impl Into<String>, info: ProcessInfo) -> Self {
        self.process.insert(key.into(), info);
        self
    }

    /// Whether any recorded module outcome is a failure.
    pub fn has_failures(&self) -> bool {
        self.process
            .values()
            .any(|p| p.status == ProcessStatus::Failed)
    }
}

/// Audit record of one module invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Display name of the module.
    pub module: String,
    /// Fully resolved options the module ran with.
    pub options: Map<String, Value>,
    pub status: ProcessStatus,
    /// Cost delta added by the module.
    pub cost: f64,
    /// Retry counter at the time the module ran.
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Success,
    Failed,
}
