//! Scripted fetcher shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::fetcher::{DataFetcher, FetchFailure, FetchResult, PackageInventory};
use crate::namespace::EntityKind;

/// Answers every kind from a fixed script and records how it was called.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    failing: HashSet<String>,
    installed: Vec<String>,
    delay: Duration,
    calls: Mutex<HashMap<(String, EntityKind), usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kind fails for `identifier`.
    pub fn failing(mut self, identifier: &str) -> Self {
        self.failing.insert(identifier.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_installed(mut self, packages: &[&str]) -> Self {
        self.installed = packages.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Four commands per package, so a fan-out of three leaves one cold.
    pub fn commands_for(package: &str) -> Vec<String> {
        vec![
            package.to_string(),
            format!("{package}-cli"),
            format!("{package}-config"),
            format!("{package}-extra"),
        ]
    }

    pub fn calls(&self, identifier: &str, kind: EntityKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(identifier.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataFetcher for ScriptedFetcher {
    async fn fetch(&self, identifier: &str, kind: EntityKind) -> FetchResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry((identifier.to_string(), kind))
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(identifier) {
            return FetchResult::failed(format!("Error: No available formula with the name \"{identifier}\""), Some(1));
        }

        match kind {
            EntityKind::Info => FetchResult::ok(json!(format!("==> {identifier}: stable 1.0"))),
            EntityKind::InfoWithDeps => FetchResult::ok(json!({
                "name": identifier,
                "dependencies": ["openssl@3"],
                "dependents": [],
            })),
            EntityKind::Commands => FetchResult::ok(json!(Self::commands_for(identifier))),
            EntityKind::Documentation => FetchResult::ok(json!(format!("tldr page for {identifier}"))),
        }
    }
}

#[async_trait]
impl PackageInventory for ScriptedFetcher {
    async fn installed_packages(&self) -> Result<Vec<String>, FetchFailure> {
        Ok(self.installed.clone())
    }
}
