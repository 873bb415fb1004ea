//! Request DTOs for the cache admin API
//!
//! Defines the structure of incoming HTTP request bodies. Invalidation and
//! mutation bodies deserialize straight into [`crate::namespace`] types.

use serde::Deserialize;

/// Request body for POST /cache/warmup
#[derive(Debug, Clone, Deserialize)]
pub struct WarmupBody {
    /// Packages to warm
    pub identifiers: Vec<String>,
    /// Simultaneous gateway calls (server default if omitted)
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
    /// Wait for the batch and return its outcome
    #[serde(default)]
    pub wait: bool,
}

/// Request body for POST /cache/warmup/installed
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarmInstalledBody {
    /// Warm at most this many installed packages
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
    #[serde(default)]
    pub wait: bool,
}

impl WarmupBody {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.identifiers.iter().any(|id| id.is_empty()) {
            return Some("Identifiers cannot be empty".to_string());
        }
        if self.concurrency_limit == Some(0) {
            return Some("concurrency_limit must be at least 1".to_string());
        }
        None
    }
}
