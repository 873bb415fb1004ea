//! Cache Pre-Populator
//!
//! Warms the cache for a batch of packages in the background. Each package
//! is one unit of work: basic info first, then dependency info and the
//! command list, then documentation for the first few commands. A batch
//! semaphore caps how many gateway calls run at once, and a failing unit
//! is recorded without disturbing its siblings.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{CacheError, Result};
use crate::fetcher::PackageInventory;
use crate::gateway::CacheGateway;
use crate::namespace::EntityKind;

/// Default number of simultaneous gateway calls per batch.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Default number of commands per package whose documentation is warmed.
pub const DEFAULT_DOC_FANOUT: usize = 3;

const SHUTTING_DOWN: &str = "shutting down";

// == Warmup Request ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupRequest {
    pub identifiers: Vec<String>,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

impl WarmupRequest {
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(CacheError::InvalidRequest(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// == Outcomes ==
/// What happened to one package of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub identifier: String,
    pub success: bool,
    /// Why the unit failed
    pub reason: Option<String>,
    /// Documentation pages fetched or already cached
    pub docs_warmed: usize,
}

impl UnitOutcome {
    fn succeeded(identifier: String, docs_warmed: usize) -> Self {
        Self {
            identifier,
            success: true,
            reason: None,
            docs_warmed,
        }
    }

    fn failed(identifier: String, reason: impl Into<String>) -> Self {
        Self {
            identifier,
            success: false,
            reason: Some(reason.into()),
            docs_warmed: 0,
        }
    }
}

/// Aggregate result of a batch. `results` follows request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupOutcome {
    pub results: Vec<UnitOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

impl WarmupOutcome {
    fn from_results(results: Vec<UnitOutcome>, started: Instant) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            failed: results.len() - succeeded,
            succeeded,
            results,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn failed_identifiers(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.identifier.as_str())
            .collect()
    }
}

// == Warmup Handle ==
/// A batch running in the background.
///
/// Dropping the handle detaches the batch; it still runs to completion.
#[derive(Debug)]
pub struct WarmupHandle {
    task: JoinHandle<Result<WarmupOutcome>>,
}

impl WarmupHandle {
    /// Waits for the batch and returns its outcome.
    pub async fn wait(self) -> Result<WarmupOutcome> {
        self.task
            .await
            .map_err(|e| CacheError::Internal(format!("warm-up batch task failed: {e}")))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// == Batch ==
/// Per-batch state shared by its units.
struct Batch {
    gateway: Arc<CacheGateway>,
    permits: Arc<Semaphore>,
    doc_fanout: usize,
}

impl Batch {
    async fn call(&self, kind: EntityKind, identifier: &str) -> std::result::Result<Value, String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SHUTTING_DOWN.to_string())?;
        self.gateway
            .fetch(kind, identifier)
            .await
            .map_err(|e| e.to_string())
    }

    async fn commands(&self, package: &str) -> std::result::Result<Vec<String>, String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SHUTTING_DOWN.to_string())?;
        self.gateway
            .fetch_as(EntityKind::Commands, package)
            .await
            .map_err(|e| e.to_string())
    }

    async fn warm_unit(self: Arc<Self>, identifier: String) -> UnitOutcome {
        if let Err(reason) = self.call(EntityKind::Info, &identifier).await {
            warn!(package = %identifier, "failed to cache package info: {}", reason);
            return UnitOutcome::failed(identifier, format!("info: {reason}"));
        }

        // Both depend on the package having resolved, not on each other
        let (deps, commands) = tokio::join!(
            self.call(EntityKind::InfoWithDeps, &identifier),
            self.commands(&identifier)
        );

        let docs_warmed = match &commands {
            Ok(commands) => self.warm_docs(commands).await,
            Err(_) => 0,
        };

        match (deps, commands) {
            (Ok(_), Ok(_)) => {
                debug!(
                    package = %identifier,
                    "cached package data (basic, deps, commands), cached docs for {} commands",
                    docs_warmed
                );
                UnitOutcome::succeeded(identifier, docs_warmed)
            }
            (deps, commands) => {
                let reason = [
                    deps.err().map(|e| format!("deps: {e}")),
                    commands.err().map(|e| format!("commands: {e}")),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("; ");
                warn!(package = %identifier, "failed to cache some package data: {}", reason);
                UnitOutcome::failed(identifier, reason)
            }
        }
    }

    /// Warms documentation for the first `doc_fanout` commands.
    ///
    /// Returns how many pages ended up cached; misses are only logged.
    async fn warm_docs(self: &Arc<Self>, commands: &[String]) -> usize {
        let mut docs = JoinSet::new();
        for command in commands.iter().take(self.doc_fanout).cloned() {
            let batch = Arc::clone(self);
            docs.spawn(async move {
                match batch.call(EntityKind::Documentation, &command).await {
                    Ok(_) => true,
                    Err(reason) => {
                        debug!(%command, "failed to cache documentation: {}", reason);
                        false
                    }
                }
            });
        }

        let mut warmed = 0;
        while let Some(joined) = docs.join_next().await {
            if matches!(joined, Ok(true)) {
                warmed += 1;
            }
        }
        warmed
    }

    async fn run(self: Arc<Self>, identifiers: Vec<String>) -> WarmupOutcome {
        let started = Instant::now();
        let mut units = JoinSet::new();

        for (index, identifier) in identifiers.iter().cloned().enumerate() {
            let batch = Arc::clone(&self);
            units.spawn(async move {
                // A panic inside the unit surfaces here as a JoinError
                let unit = tokio::spawn(batch.warm_unit(identifier.clone()));
                let outcome = match unit.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(package = %identifier, "error caching package data: {}", e);
                        UnitOutcome::failed(identifier, format!("warm-up task failed: {e}"))
                    }
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<UnitOutcome>> = vec![None; identifiers.len()];
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!("warm-up unit could not be joined: {}", e),
            }
        }

        let results = slots
            .into_iter()
            .zip(identifiers)
            .map(|(slot, identifier)| {
                slot.unwrap_or_else(|| UnitOutcome::failed(identifier, "warm-up task lost"))
            })
            .collect();
        WarmupOutcome::from_results(results, started)
    }
}

// == Pool State ==
#[derive(Debug, Default)]
struct PoolState {
    closed: bool,
    /// Semaphores of batches that may still be running
    batches: Vec<Weak<Semaphore>>,
}

// == Pre-Populator ==
/// Launches warm-up batches against a gateway.
///
/// Cheap to clone; clones share the same shutdown state.
#[derive(Clone)]
pub struct PrePopulator {
    gateway: Arc<CacheGateway>,
    inventory: Option<Arc<dyn PackageInventory>>,
    doc_fanout: usize,
    pool: Arc<Mutex<PoolState>>,
}

impl std::fmt::Debug for PrePopulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrePopulator")
            .field("doc_fanout", &self.doc_fanout)
            .field("has_inventory", &self.inventory.is_some())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl PrePopulator {
    pub fn new(gateway: Arc<CacheGateway>) -> Self {
        Self {
            gateway,
            inventory: None,
            doc_fanout: DEFAULT_DOC_FANOUT,
            pool: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    /// Source of installed package names for [`warm_installed`](Self::warm_installed).
    pub fn with_inventory(mut self, inventory: Arc<dyn PackageInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_doc_fanout(mut self, doc_fanout: usize) -> Self {
        self.doc_fanout = doc_fanout;
        self
    }

    fn pool(&self) -> MutexGuard<'_, PoolState> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates `request` and registers a new batch with the pool.
    fn admit(&self, request: &WarmupRequest) -> Result<Arc<Batch>> {
        request.validate()?;

        let mut pool = self.pool();
        if pool.closed {
            return Err(CacheError::ShuttingDown);
        }

        let permits = Arc::new(Semaphore::new(request.concurrency_limit));
        pool.batches.retain(|batch| batch.strong_count() > 0);
        pool.batches.push(Arc::downgrade(&permits));

        Ok(Arc::new(Batch {
            gateway: Arc::clone(&self.gateway),
            permits,
            doc_fanout: self.doc_fanout,
        }))
    }

    // == Run ==
    /// Runs a batch and waits for every unit to finish.
    pub async fn run(&self, request: WarmupRequest) -> Result<WarmupOutcome> {
        let batch = self.admit(&request)?;
        Ok(run_logged(batch, request).await)
    }

    // == Spawn ==
    /// Starts a batch on a background task and returns at once.
    pub fn spawn(&self, request: WarmupRequest) -> Result<WarmupHandle> {
        let batch = self.admit(&request)?;
        Ok(WarmupHandle {
            task: tokio::spawn(async move { Ok(run_logged(batch, request).await) }),
        })
    }

    // == Installed Packages ==
    /// Warms the first `limit` installed packages (all of them if `None`).
    pub async fn warm_installed(
        &self,
        limit: Option<usize>,
        concurrency_limit: usize,
    ) -> Result<WarmupOutcome> {
        let inventory = self.inventory.as_ref().ok_or_else(|| {
            CacheError::InvalidOperation("no package inventory configured".to_string())
        })?;

        let mut installed = inventory.installed_packages().await.map_err(|failure| {
            warn!("Failed to get installed packages: {}", failure.message);
            CacheError::Fetch {
                key: "installed-packages".to_string(),
                message: failure.message,
                exit_code: failure.exit_code,
            }
        })?;

        if installed.is_empty() {
            warn!("No installed packages found to pre-populate cache");
        }
        if let Some(limit) = limit {
            if installed.len() > limit {
                info!(
                    "Found {} installed packages, limiting to {} for pre-population",
                    installed.len(),
                    limit
                );
                installed.truncate(limit);
            }
        }

        self.run(WarmupRequest::new(installed).with_concurrency_limit(concurrency_limit))
            .await
    }

    /// Background form of [`warm_installed`](Self::warm_installed).
    pub fn spawn_installed(
        &self,
        limit: Option<usize>,
        concurrency_limit: usize,
    ) -> Result<WarmupHandle> {
        if self.is_shut_down() {
            return Err(CacheError::ShuttingDown);
        }
        let this = self.clone();
        Ok(WarmupHandle {
            task: tokio::spawn(async move {
                let result = this.warm_installed(limit, concurrency_limit).await;
                // The handle may already be dropped
                if let Err(e) = &result {
                    warn!("Cache pre-population failed: {}", e);
                }
                result
            }),
        })
    }

    // == Shutdown ==
    /// Stops admitting batches and releases every batch's pool.
    ///
    /// Units already inside a gateway call finish normally; units still
    /// waiting for a slot give up and are recorded as failures.
    pub fn shutdown(&self) {
        let mut pool = self.pool();
        pool.closed = true;
        let mut stopped = 0;
        for permits in pool.batches.drain(..).filter_map(|batch| batch.upgrade()) {
            permits.close();
            stopped += 1;
        }
        info!("Shutting down cache pre-populator, {} running batches stopped", stopped);
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool().closed
    }
}

async fn run_logged(batch: Arc<Batch>, request: WarmupRequest) -> WarmupOutcome {
    if request.identifiers.is_empty() {
        return WarmupOutcome::default();
    }

    info!(
        "Starting cache pre-population for {} packages (concurrency {})",
        request.identifiers.len(),
        request.concurrency_limit
    );
    let outcome = batch.run(request.identifiers).await;
    info!(
        "Cache pre-population completed in {}ms. Success: {}, Failed: {}",
        outcome.elapsed_ms, outcome.succeeded, outcome.failed
    );
    if outcome.failed > 0 {
        warn!(
            "Failed to cache packages: {}",
            outcome.failed_identifiers().join(", ")
        );
    }
    outcome
}
