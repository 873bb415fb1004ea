//! Brew Cache - A read-through cache for package manager queries
//!
//! Remembers the answers of slow package manager commands (package info,
//! dependencies, installed commands, documentation) with per-kind TTLs,
//! LRU eviction, invalidation after mutating commands, and bounded-
//! concurrency background warm-up.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod gateway;
pub mod models;
pub mod namespace;
pub mod prepopulate;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use api::{create_router, AppState};
pub use cache::{CacheStats, CacheStore};
pub use config::Config;
pub use error::{CacheError, Result};
pub use fetcher::{DataFetcher, FetchResult, PackageInventory};
pub use gateway::{CacheGateway, TtlPolicy};
pub use namespace::{CacheKey, EntityKind, Invalidation, Mutation};
pub use prepopulate::{PrePopulator, WarmupOutcome, WarmupRequest};
pub use tasks::spawn_cleanup_task;
