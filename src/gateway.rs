//! Cache Gateway
//!
//! Read-through access per entity kind: answer from the store when a live
//! entry exists, otherwise ask the fetcher once and remember the answer.
//! Failures are remembered too, briefly, in a separate negative store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, CacheStore};
use crate::error::{CacheError, Result};
use crate::fetcher::{DataFetcher, FetchFailure};
use crate::namespace::{CacheKey, EntityKind, Invalidation, Mutation};

/// Default capacity of the negative store.
pub const DEFAULT_NEGATIVE_CAPACITY: usize = 256;

// == TTL Policy ==
/// How long each kind of fact stays fresh, plus how long a failure is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub info: Duration,
    pub info_with_deps: Duration,
    pub commands: Duration,
    pub documentation: Duration,
    pub negative: Duration,
}

impl TtlPolicy {
    /// TTL for a successful fetch of `kind`.
    pub fn positive(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::Info => self.info,
            EntityKind::InfoWithDeps => self.info_with_deps,
            EntityKind::Commands => self.commands,
            EntityKind::Documentation => self.documentation,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            info: Duration::from_secs(600),
            info_with_deps: Duration::from_secs(600),
            commands: Duration::from_secs(1800),
            documentation: Duration::from_secs(24 * 60 * 60),
            negative: Duration::from_secs(60),
        }
    }
}

// == Single Flight ==
/// The lock shared by every caller currently fetching one key.
#[derive(Debug)]
struct Flight {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Callers holding or waiting on `lock`
    holders: usize,
}

type FlightMap = Mutex<HashMap<CacheKey, Flight>>;

/// One caller's membership in a key's flight.
///
/// Leaving happens on drop, so a cancelled fetch leaves too. The last
/// holder out removes the map entry.
struct FlightTicket<'a> {
    inflight: &'a FlightMap,
    key: CacheKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> FlightTicket<'a> {
    fn join(inflight: &'a FlightMap, key: &CacheKey) -> Self {
        let mut flights = inflight.lock().unwrap_or_else(PoisonError::into_inner);
        let flight = flights.entry(key.clone()).or_insert_with(|| Flight {
            lock: Arc::new(tokio::sync::Mutex::new(())),
            holders: 0,
        });
        flight.holders += 1;
        Self {
            inflight,
            key: key.clone(),
            lock: Arc::clone(&flight.lock),
        }
    }
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        let mut flights = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(flight) = flights.get_mut(&self.key) else {
            return;
        };
        // A newer flight for the same key is not ours to touch
        if !Arc::ptr_eq(&flight.lock, &self.lock) {
            return;
        }
        flight.holders = flight.holders.saturating_sub(1);
        if flight.holders == 0 {
            flights.remove(&self.key);
        }
    }
}

// == Cache Gateway ==
/// Read-through front of one value store.
///
/// Serves live entries straight from the store. On a miss it asks the
/// fetcher, with at most one call per key in flight, and stores the answer
/// under the kind's TTL. Failures go to the negative store for a shorter
/// TTL. Also the single place where invalidation is applied.
pub struct CacheGateway {
    store: Arc<CacheStore<Value>>,
    negative: CacheStore<FetchFailure>,
    fetcher: Arc<dyn DataFetcher>,
    ttl: TtlPolicy,
    /// One async lock per key with a fetch in progress
    inflight: FlightMap,
}

impl std::fmt::Debug for CacheGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGateway")
            .field("store", &self.store)
            .field("negative", &self.negative)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CacheGateway {
    pub fn new(store: Arc<CacheStore<Value>>, fetcher: Arc<dyn DataFetcher>, ttl: TtlPolicy) -> Self {
        Self {
            store,
            negative: CacheStore::new(DEFAULT_NEGATIVE_CAPACITY),
            fetcher,
            ttl,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the store that remembers recent failures.
    pub fn with_negative_store(mut self, negative: CacheStore<FetchFailure>) -> Self {
        self.negative = negative;
        self
    }

    // == Fetch ==
    /// Returns the value for `identifier` of `kind`, fetching it on a miss.
    ///
    /// Concurrent misses on the same key share a single fetcher call. A
    /// failure is cached for the negative TTL and returned as
    /// [`CacheError::Fetch`] until it lapses.
    pub async fn fetch(&self, kind: EntityKind, identifier: &str) -> Result<Value> {
        let key = CacheKey::new(kind, identifier);

        match self.store.get(key.as_str()) {
            Ok(value) => {
                debug!(%key, "cache hit");
                return Ok(value);
            }
            Err(e) if e.is_miss() => debug!(%key, "cache miss"),
            Err(e) => return Err(e),
        }
        if let Some(failure) = self.negative.peek(key.as_str()) {
            debug!(%key, "recent failure still cached");
            return Err(fetch_error(&key, failure));
        }

        let ticket = FlightTicket::join(&self.inflight, &key);
        let _guard = ticket.lock.lock().await;

        // Whoever held the lock before us may have answered already
        if let Some(value) = self.store.peek(key.as_str()) {
            Ok(value)
        } else if let Some(failure) = self.negative.peek(key.as_str()) {
            Err(fetch_error(&key, failure))
        } else {
            self.fetch_and_store(kind, identifier, &key).await
        }
    }

    async fn fetch_and_store(&self, kind: EntityKind, identifier: &str, key: &CacheKey) -> Result<Value> {
        match self.fetcher.fetch(identifier, kind).await.into_result() {
            Ok(value) => {
                let ttl = self.ttl.positive(kind);
                self.store.set(key.as_str(), value.clone(), ttl);
                self.negative.remove(key.as_str());
                debug!(%key, ttl_secs = ttl.as_secs(), "cached value");
                Ok(value)
            }
            Err(failure) => {
                warn!(%key, exit_code = ?failure.exit_code, "fetch failed: {}", failure.message);
                self.negative
                    .set(key.as_str(), failure.clone(), self.ttl.negative);
                Err(fetch_error(key, failure))
            }
        }
    }

    /// Like [`fetch`](Self::fetch), decoding the value into `T`.
    ///
    /// A value of the wrong shape is reported as
    /// [`CacheError::InvalidOperation`], never silently coerced.
    pub async fn fetch_as<T: DeserializeOwned>(&self, kind: EntityKind, identifier: &str) -> Result<T> {
        let value = self.fetch(kind, identifier).await?;
        serde_json::from_value(value).map_err(|e| {
            CacheError::InvalidOperation(format!(
                "{} does not hold the expected shape: {e}",
                CacheKey::new(kind, identifier)
            ))
        })
    }

    /// Keys with a fetch currently in flight.
    #[cfg(test)]
    fn in_flight_keys(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // == Invalidation ==
    /// Drops whatever `invalidation` covers. Returns live entries removed.
    pub fn invalidate(&self, invalidation: &Invalidation) -> usize {
        match invalidation.keys() {
            Some(keys) => {
                let removed = self.store.remove_many(&keys);
                self.negative.remove_many(&keys);
                info!(?invalidation, removed, "invalidated entity");
                removed
            }
            None => self.clear(),
        }
    }

    pub fn invalidate_entity(&self, identifier: &str) -> usize {
        self.invalidate(&Invalidation::entity(identifier))
    }

    pub fn invalidate_global(&self) -> usize {
        self.invalidate(&Invalidation::Global)
    }

    /// Invalidates what a successful `mutation` made stale.
    pub fn apply_mutation(&self, mutation: &Mutation) -> usize {
        self.invalidate(&mutation.invalidation())
    }

    /// Empties both the value store and the failure store.
    pub fn clear(&self) -> usize {
        let removed = self.store.clear();
        self.negative.clear();
        info!("Cleared cache with {} entries", removed);
        removed
    }

    // == Accessors ==
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn negative_stats(&self) -> CacheStats {
        self.negative.stats()
    }

    pub fn store(&self) -> &Arc<CacheStore<Value>> {
        &self.store
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }
}

fn fetch_error(key: &CacheKey, failure: FetchFailure) -> CacheError {
    CacheError::Fetch {
        key: key.to_string(),
        message: failure.message,
        exit_code: failure.exit_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::test_support::ScriptedFetcher;
    use serde_json::json;

    struct Harness {
        gateway: Arc<CacheGateway>,
        fetcher: Arc<ScriptedFetcher>,
        clock: Arc<ManualClock>,
    }

    fn harness(fetcher: ScriptedFetcher) -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let fetcher = Arc::new(fetcher);
        let store = Arc::new(CacheStore::with_clock(100, clock.clone()));
        let gateway = CacheGateway::new(store, fetcher.clone(), TtlPolicy::default())
            .with_negative_store(CacheStore::with_clock(16, clock.clone()));
        Harness {
            gateway: Arc::new(gateway),
            fetcher,
            clock,
        }
    }

    #[test]
    fn test_ttl_policy_per_kind() {
        let ttl = TtlPolicy::default();
        assert_eq!(ttl.positive(EntityKind::Info), Duration::from_secs(600));
        assert_eq!(ttl.positive(EntityKind::Commands), Duration::from_secs(1800));
        assert!(ttl.positive(EntityKind::Documentation) > ttl.positive(EntityKind::Commands));
        assert!(ttl.negative < ttl.positive(EntityKind::Info));
    }

    #[tokio::test]
    async fn test_miss_fetches_then_hit_short_circuits() {
        let h = harness(ScriptedFetcher::new());

        let first = h.gateway.fetch(EntityKind::Info, "node").await.unwrap();
        let second = h.gateway.fetch(EntityKind::Info, "node").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.fetcher.calls("node", EntityKind::Info), 1);
        let stats = h.gateway.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_positive_entry_expires_per_kind() {
        let h = harness(ScriptedFetcher::new());

        h.gateway.fetch(EntityKind::Info, "node").await.unwrap();
        h.gateway.fetch(EntityKind::Documentation, "node").await.unwrap();
        h.clock.advance(Duration::from_secs(601));
        h.gateway.fetch(EntityKind::Info, "node").await.unwrap();
        h.gateway.fetch(EntityKind::Documentation, "node").await.unwrap();

        assert_eq!(h.fetcher.calls("node", EntityKind::Info), 2);
        assert_eq!(h.fetcher.calls("node", EntityKind::Documentation), 1);
    }

    #[tokio::test]
    async fn test_failure_is_cached_briefly_and_kept_out_of_main_store() {
        let h = harness(ScriptedFetcher::new().failing("badpkg"));

        let err = h.gateway.fetch(EntityKind::Info, "badpkg").await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Fetch { ref key, exit_code: Some(1), .. } if key == "info:badpkg"
        ));

        // Within the negative TTL the fetcher is not asked again
        assert!(h.gateway.fetch(EntityKind::Info, "badpkg").await.is_err());
        assert_eq!(h.fetcher.calls("badpkg", EntityKind::Info), 1);
        assert!(h.gateway.store().peek("info:badpkg").is_none());
        assert_eq!(h.gateway.negative_stats().total_entries, 1);

        // Once it lapses, the next access retries
        h.clock.advance(Duration::from_secs(60));
        assert!(h.gateway.fetch(EntityKind::Info, "badpkg").await.is_err());
        assert_eq!(h.fetcher.calls("badpkg", EntityKind::Info), 2);
    }

    #[tokio::test]
    async fn test_fetch_as_decodes_and_rejects_wrong_shape() {
        let h = harness(ScriptedFetcher::new());

        let commands: Vec<String> = h.gateway.fetch_as(EntityKind::Commands, "node").await.unwrap();
        assert_eq!(commands, ScriptedFetcher::commands_for("node"));

        let err = h
            .gateway
            .fetch_as::<Vec<String>>(EntityKind::Info, "node")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let h = harness(ScriptedFetcher::new().with_delay(Duration::from_millis(50)));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let gateway = Arc::clone(&h.gateway);
            tasks.spawn(async move { gateway.fetch(EntityKind::Commands, "node").await });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), json!(ScriptedFetcher::commands_for("node")));
        }

        assert_eq!(h.fetcher.calls("node", EntityKind::Commands), 1);
    }

    #[tokio::test]
    async fn test_invalidate_entity_is_precise() {
        let h = harness(ScriptedFetcher::new());
        for id in ["node", "python"] {
            for kind in EntityKind::PACKAGE_KINDS {
                h.gateway.fetch(kind, id).await.unwrap();
            }
        }
        h.gateway.fetch(EntityKind::Documentation, "node").await.unwrap();

        assert_eq!(h.gateway.invalidate_entity("node"), 3);

        let store = h.gateway.store();
        assert!(store.peek("info:node").is_none());
        assert!(store.peek("info-with-deps:node").is_none());
        assert!(store.peek("commands:node").is_none());
        assert!(store.peek("info:python").is_some());
        // Documentation is keyed by command, not package
        assert!(store.peek("doc:node").is_some());
        // Invalidating something never cached is a no-op
        assert_eq!(h.gateway.invalidate_entity("never-cached"), 0);
    }

    #[tokio::test]
    async fn test_invalidate_entity_forgets_recent_failure() {
        let h = harness(ScriptedFetcher::new().failing("wget"));
        assert!(h.gateway.fetch(EntityKind::Info, "wget").await.is_err());

        h.gateway.apply_mutation(&Mutation::Install {
            package: "wget".into(),
        });

        assert!(h.gateway.fetch(EntityKind::Info, "wget").await.is_err());
        assert_eq!(h.fetcher.calls("wget", EntityKind::Info), 2);
    }

    #[tokio::test]
    async fn test_global_mutation_clears_everything() {
        let h = harness(ScriptedFetcher::new().failing("badpkg"));
        for id in ["node", "python", "git"] {
            h.gateway.fetch(EntityKind::Info, id).await.unwrap();
        }
        let _ = h.gateway.fetch(EntityKind::Info, "badpkg").await;

        assert_eq!(h.gateway.apply_mutation(&Mutation::Upgrade), 3);

        assert_eq!(h.gateway.stats().total_entries, 0);
        assert_eq!(h.gateway.negative_stats().total_entries, 0);
        assert_eq!(h.gateway.invalidate_global(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetches_leave_no_flight_behind() {
        let h = harness(ScriptedFetcher::new().with_delay(Duration::from_millis(200)));

        for i in 0..5 {
            let id = format!("pkg{i}");
            let fetch = h.gateway.fetch(EntityKind::Info, &id);
            assert!(tokio::time::timeout(Duration::from_millis(10), fetch)
                .await
                .is_err());
        }

        assert_eq!(h.gateway.in_flight_keys(), 0);
        assert_eq!(h.gateway.stats().total_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_does_not_disturb_leader() {
        let h = harness(ScriptedFetcher::new().with_delay(Duration::from_millis(200)));

        let gateway = Arc::clone(&h.gateway);
        let leader = tokio::spawn(async move { gateway.fetch(EntityKind::Info, "node").await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let waiter = h.gateway.fetch(EntityKind::Info, "node");
        assert!(tokio::time::timeout(Duration::from_millis(10), waiter)
            .await
            .is_err());
        // The leader still owns the flight
        assert_eq!(h.gateway.in_flight_keys(), 1);

        leader.await.unwrap().unwrap();
        assert_eq!(h.gateway.in_flight_keys(), 0);
        assert_eq!(h.fetcher.calls("node", EntityKind::Info), 1);

        // A fresh reader is served from the store
        h.gateway.fetch(EntityKind::Info, "node").await.unwrap();
        assert_eq!(h.fetcher.calls("node", EntityKind::Info), 1);
    }
}
