//! Error types for the package cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache, the gateway and the warm-up pool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key has expired
    #[error("Key expired: {0}")]
    Expired(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A cached value did not have the shape its caller asked for
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The data fetcher failed (or a recent failure is still cached)
    #[error("Fetch failed for {key}: {message}")]
    Fetch {
        key: String,
        message: String,
        exit_code: Option<i32>,
    },

    /// The warm-up pool no longer accepts batches
    #[error("Pre-populator is shutting down")]
    ShuttingDown,

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// True for the two "nothing usable under this key" variants.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::NotFound(_) | CacheError::Expired(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::Expired(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CacheError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            CacheError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_variants() {
        assert!(CacheError::NotFound("k".into()).is_miss());
        assert!(CacheError::Expired("k".into()).is_miss());
        assert!(!CacheError::ShuttingDown.is_miss());
    }

    #[test]
    fn test_status_codes() {
        let fetch = CacheError::Fetch {
            key: "info:badpkg".into(),
            message: "exit 1".into(),
            exit_code: Some(1),
        };
        assert_eq!(fetch.into_response().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            CacheError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CacheError::ShuttingDown.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
