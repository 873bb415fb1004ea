//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with LRU tracking and TTL expiration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cache::{CacheEntry, CacheStats, Clock, LruTracker, SystemClock};
use crate::error::{CacheError, Result};

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    lru: LruTracker,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn drop_entry(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }
}

// == Cache Store ==
/// Concurrency-safe TTL store with a hard entry bound and LRU eviction.
///
/// All state sits behind one mutex and each public method takes it exactly
/// once, so every call is atomic with respect to every other call. Nothing
/// in here awaits or does I/O.
#[derive(Debug)]
pub struct CacheStore<V> {
    inner: Mutex<Inner<V>>,
    /// Maximum number of entries allowed
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> CacheStore<V> {
    // == Constructor ==
    /// Creates a store holding at most `max_entries` entries (at least one).
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    /// Creates a store reading time from `clock`.
    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                stats: CacheStats::new(),
            }),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // Every critical section leaves the maps consistent, so a panic
        // elsewhere does not invalidate them.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // == Get ==
    /// Retrieves a live value, counting exactly one hit or one miss.
    ///
    /// An expired entry is removed on sight and reported as `Expired`.
    pub fn get(&self, key: &str) -> Result<V> {
        let now = self.clock.now_ms();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key).map(|e| e.is_expired_at(now)) {
            None => {
                inner.stats.record_miss();
                return Err(CacheError::NotFound(key.to_string()));
            }
            Some(expired) => expired,
        };

        if expired {
            inner.drop_entry(key);
            inner.stats.record_expirations(1);
            inner.stats.record_miss();
            return Err(CacheError::Expired(key.to_string()));
        }

        inner.stats.record_hit();
        inner.lru.touch(key);
        inner
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| CacheError::Internal(format!("entry vanished under lock: {key}")))
    }

    // == Peek ==
    /// Reads a live value without touching counters or recency.
    pub fn peek(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        let inner = self.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value.clone())
    }

    // == Set ==
    /// Upserts `key`, resetting its TTL.
    ///
    /// Inserting a new key into a full store evicts the least recently used
    /// entry first, under the same lock. Overwrites never evict.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now_ms();
        let mut inner = self.lock();

        let is_overwrite = inner.entries.contains_key(&key);
        if !is_overwrite && inner.entries.len() >= self.max_entries {
            if let Some(evicted) = inner.lru.evict_oldest() {
                inner.entries.remove(&evicted);
                inner.stats.record_eviction();
                tracing::debug!(key = %evicted, "evicted least recently used entry");
            }
        }

        inner.lru.touch(&key);
        inner.entries.insert(key, CacheEntry::new(value, ttl, now));
        let len = inner.entries.len();
        inner.stats.set_total_entries(len);
    }

    // == Remove ==
    /// Removes `key`. Returns whether anything was there; absence is not an error.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.drop_entry(key);
        let len = inner.entries.len();
        inner.stats.set_total_entries(len);
        removed
    }

    // == Remove Many ==
    /// Removes every key in `keys` in one atomic step.
    ///
    /// Returns how many were present.
    pub fn remove_many<K: AsRef<str>>(&self, keys: &[K]) -> usize {
        let mut inner = self.lock();
        let removed = keys
            .iter()
            .filter(|key| inner.drop_entry(key.as_ref()))
            .count();
        let len = inner.entries.len();
        inner.stats.set_total_entries(len);
        removed
    }

    // == Clear ==
    /// Empties the store. Counters are lifetime totals and survive.
    ///
    /// Returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.lru.clear();
        inner.stats.set_total_entries(0);
        count
    }

    // == Stats ==
    /// Returns a snapshot of the counters taken under the lock.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.set_total_entries(inner.entries.len());
        stats
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut inner = self.lock();

        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            inner.drop_entry(key);
        }

        let count = expired_keys.len();
        inner.stats.record_expirations(count);
        let len = inner.entries.len();
        inner.stats.set_total_entries(len);
        count
    }

    // == Remaining TTL ==
    /// Remaining lifetime of a live entry.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        let inner = self.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| Duration::from_millis(entry.ttl_remaining_ms(now)))
    }

    /// Configured capacity.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
