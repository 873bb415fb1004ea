//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::FetchTimeouts;
use crate::gateway::TtlPolicy;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of cached values
    pub max_entries: usize,
    /// Maximum number of remembered fetch failures
    pub negative_max_entries: usize,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Freshness per entity kind, plus the failure TTL
    pub ttl: TtlPolicy,
    /// Simultaneous gateway calls per warm-up batch
    pub warmup_concurrency: usize,
    /// Commands per package whose documentation is warmed
    pub warmup_doc_fanout: usize,
    /// Installed packages warmed at startup (0 disables)
    pub warmup_startup_limit: usize,
    /// Per-invocation fetch timeouts
    pub fetch_timeouts: FetchTimeouts,
    /// Package manager executable
    pub package_bin: String,
    /// Documentation executable
    pub docs_bin: String,
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_or(name: &str, default: Duration) -> Duration {
    Duration::from_secs(var_or(name, default.as_secs()))
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` (1000), `NEGATIVE_MAX_ENTRIES` (256)
    /// - `SERVER_PORT` (3000), `CLEANUP_INTERVAL` seconds (30)
    /// - `TTL_INFO` (600), `TTL_INFO_DEPS` (600), `TTL_COMMANDS` (1800),
    ///   `TTL_DOCS` (86400), `TTL_NEGATIVE` (60), all in seconds
    /// - `WARMUP_CONCURRENCY` (4), `WARMUP_DOC_FANOUT` (3), `WARMUP_STARTUP_LIMIT` (20)
    /// - `FETCH_TIMEOUT` (30), `DOC_FETCH_TIMEOUT` (10), in seconds
    /// - `BREW_BIN` (`brew`), `TLDR_BIN` (`tldr`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: var_or("MAX_ENTRIES", defaults.max_entries),
            negative_max_entries: var_or("NEGATIVE_MAX_ENTRIES", defaults.negative_max_entries),
            server_port: var_or("SERVER_PORT", defaults.server_port),
            cleanup_interval: var_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            ttl: TtlPolicy {
                info: secs_or("TTL_INFO", defaults.ttl.info),
                info_with_deps: secs_or("TTL_INFO_DEPS", defaults.ttl.info_with_deps),
                commands: secs_or("TTL_COMMANDS", defaults.ttl.commands),
                documentation: secs_or("TTL_DOCS", defaults.ttl.documentation),
                negative: secs_or("TTL_NEGATIVE", defaults.ttl.negative),
            },
            // A batch needs at least one slot to make progress
            warmup_concurrency: var_or("WARMUP_CONCURRENCY", defaults.warmup_concurrency).max(1),
            warmup_doc_fanout: var_or("WARMUP_DOC_FANOUT", defaults.warmup_doc_fanout),
            warmup_startup_limit: var_or("WARMUP_STARTUP_LIMIT", defaults.warmup_startup_limit),
            fetch_timeouts: FetchTimeouts {
                package: secs_or("FETCH_TIMEOUT", defaults.fetch_timeouts.package),
                documentation: secs_or("DOC_FETCH_TIMEOUT", defaults.fetch_timeouts.documentation),
            },
            package_bin: env::var("BREW_BIN").unwrap_or(defaults.package_bin),
            docs_bin: env::var("TLDR_BIN").unwrap_or(defaults.docs_bin),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            negative_max_entries: 256,
            server_port: 3000,
            cleanup_interval: 30,
            ttl: TtlPolicy::default(),
            warmup_concurrency: 4,
            warmup_doc_fanout: 3,
            warmup_startup_limit: 20,
            fetch_timeouts: FetchTimeouts::default(),
            package_bin: "brew".to_string(),
            docs_bin: "tldr".to_string(),
        }
    }
}
