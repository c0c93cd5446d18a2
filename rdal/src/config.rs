//! Configuration options for session workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RdalResult;

/// Configuration options for a session worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Human-readable worker name, used in logs and worker spans.
    #[serde(default = "default_worker_name")]
    pub name: String,

    /// Bound on the shutdown termination await, in milliseconds.
    ///
    /// `None` waits forever.
    #[serde(default)]
    pub shutdown_timeout_ms: Option<u64>,
}

impl WorkerConfig {
    /// Creates a configuration with the given name and no shutdown bound.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shutdown_timeout_ms: None,
        }
    }

    /// Parses a configuration from its JSON representation.
    pub fn from_json(payload: &str) -> RdalResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Returns the shutdown bound as a [`Duration`], if configured.
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            shutdown_timeout_ms: None,
        }
    }
}

fn default_worker_name() -> String {
    "session-worker".to_string()
}
