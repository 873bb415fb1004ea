//! Data Fetcher Module
//!
//! The one seam through which the cache learns new facts. A fetcher turns
//! an identifier into a value by doing something slow; the cache neither
//! knows nor cares what.

mod command;
mod timeout;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::namespace::EntityKind;

pub use command::CommandFetcher;
pub use timeout::{FetchTimeouts, TimeoutFetcher};

// == Fetch Result ==
/// Outcome of one fetcher invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    pub success: bool,
    pub value: Value,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
}

impl FetchResult {
    pub fn ok(value: impl Into<Value>) -> Self {
        Self {
            success: true,
            value: value.into(),
            error_message: None,
            exit_code: Some(0),
        }
    }

    pub fn failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            value: Value::Null,
            error_message: Some(message.into()),
            exit_code,
        }
    }

    pub fn into_result(self) -> Result<Value, FetchFailure> {
        if self.success {
            Ok(self.value)
        } else {
            Err(FetchFailure {
                message: self
                    .error_message
                    .unwrap_or_else(|| "fetch failed without a message".to_string()),
                exit_code: self.exit_code,
            })
        }
    }
}

// == Fetch Failure ==
/// Why a fetch produced no value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub message: String,
    pub exit_code: Option<i32>,
}

// == Traits ==
/// Produces the value for one cache miss.
///
/// Implementations must be safe to call from many tasks at once and must
/// never hang: wrap slow ones in [`TimeoutFetcher`].
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(&self, identifier: &str, kind: EntityKind) -> FetchResult;
}

/// Lists the packages currently installed, for whole-system warm-up.
#[async_trait]
pub trait PackageInventory: Send + Sync {
    async fn installed_packages(&self) -> Result<Vec<String>, FetchFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_into_result() {
        let result = FetchResult::ok(json!(["node", "npm"]));
        assert!(result.success);
        assert_eq!(result.into_result().unwrap(), json!(["node", "npm"]));
    }

    #[test]
    fn test_failed_into_result() {
        let result = FetchResult::failed("No available formula", Some(1));
        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.message, "No available formula");
        assert_eq!(failure.exit_code, Some(1));
    }

    #[test]
    fn test_failed_without_message() {
        let result = FetchResult {
            success: false,
            value: Value::Null,
            error_message: None,
            exit_code: None,
        };
        assert!(result.into_result().unwrap_err().message.contains("without"));
    }
}
