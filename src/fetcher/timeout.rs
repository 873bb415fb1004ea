//! Per-invocation timeouts for any fetcher.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{DataFetcher, FetchFailure, FetchResult, PackageInventory};
use crate::namespace::EntityKind;

/// Time allowed for one fetch, by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub package: Duration,
    pub documentation: Duration,
}

impl FetchTimeouts {
    pub fn for_kind(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::Documentation => self.documentation,
            _ => self.package,
        }
    }
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            package: Duration::from_secs(30),
            documentation: Duration::from_secs(10),
        }
    }
}

/// Bounds every call to the wrapped fetcher.
///
/// On expiry the inner future is dropped, which for [`super::CommandFetcher`]
/// kills the child process, and the call reports a failure.
#[derive(Debug)]
pub struct TimeoutFetcher<F> {
    inner: F,
    timeouts: FetchTimeouts,
}

impl<F> TimeoutFetcher<F> {
    pub fn new(inner: F, timeouts: FetchTimeouts) -> Self {
        Self { inner, timeouts }
    }
}

#[async_trait]
impl<F: DataFetcher> DataFetcher for TimeoutFetcher<F> {
    async fn fetch(&self, identifier: &str, kind: EntityKind) -> FetchResult {
        let limit = self.timeouts.for_kind(kind);
        match tokio::time::timeout(limit, self.inner.fetch(identifier, kind)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%identifier, %kind, "fetch timed out after {}s", limit.as_secs());
                FetchResult::failed(format!("timed out after {}s", limit.as_secs()), None)
            }
        }
    }
}

#[async_trait]
impl<F: PackageInventory> PackageInventory for TimeoutFetcher<F> {
    async fn installed_packages(&self) -> Result<Vec<String>, FetchFailure> {
        let limit = self.timeouts.package;
        tokio::time::timeout(limit, self.inner.installed_packages())
            .await
            .unwrap_or_else(|_| {
                Err(FetchFailure {
                    message: format!("timed out after {}s", limit.as_secs()),
                    exit_code: None,
                })
            })
    }
}
