//! Error types for the record cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache lookups, loaders and the admin API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The loader failed to fetch the record set for a key
    #[error("Load failed for {key}: {message}")]
    Load {
        key: String,
        message: String,
        retryable: bool,
    },

    /// Another thread's load for the same key failed while this caller waited on it
    #[error("Concurrent load failed for {key}: {message}")]
    ConcurrentLoadFailure {
        key: String,
        message: String,
        retryable: bool,
    },

    /// Corrupt or truncated compressed blob
    #[error("Compression error: {0}")]
    Compression(String),

    /// The blob store could not read, write or remove a persisted entry
    #[error("Blob store error: {0}")]
    Storage(String),

    /// Invalid capacity or threshold settings
    #[error("Capacity misconfiguration: {0}")]
    CapacityMisconfiguration(String),

    /// An entry already exists and overwrite was not allowed
    #[error("Entry already present: {0}")]
    AlreadyPresent(String),

    /// No cache registered under the given name
    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CacheError {
    /// Returns true when the failed operation may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::Load { retryable, .. }
            | CacheError::ConcurrentLoadFailure { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Re-labels a load failure for threads that were waiting on someone else's load.
    pub(crate) fn for_waiter(&self) -> CacheError {
        match self {
            CacheError::Load {
                key,
                message,
                retryable,
            } => CacheError::ConcurrentLoadFailure {
                key: key.clone(),
                message: message.clone(),
                retryable: *retryable,
            },
            other => other.clone(),
        }
    }
}

// == Load Error ==
/// Error returned by a [`Loader`](crate::loader::Loader) when the database fetch fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct LoadError {
    pub message: String,
    /// Timeouts and connection resets are retryable; schema mismatches are not.
    pub retryable: bool,
}

impl LoadError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Attaches the failing key, producing the caller-facing error.
    pub fn into_cache_error(self, key: impl Into<String>) -> CacheError {
        CacheError::Load {
            key: key.into(),
            message: self.message,
            retryable: self.retryable,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::UnknownCache(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) | CacheError::CapacityMisconfiguration(_) => {
                StatusCode::BAD_REQUEST
            }
            CacheError::AlreadyPresent(_) => StatusCode::CONFLICT,
            CacheError::Load { .. } | CacheError::ConcurrentLoadFailure { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::Compression(_) | CacheError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the record cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_conversion_keeps_retryable() {
        let err = LoadError::retryable("connection reset").into_cache_error("US|A");
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Load failed for US|A: connection reset"
        );
    }

    #[test]
    fn test_waiter_error_is_concurrent_failure() {
        let err = LoadError::permanent("schema mismatch").into_cache_error("k");
        let waiter = err.for_waiter();
        assert!(matches!(
            waiter,
            CacheError::ConcurrentLoadFailure { retryable: false, .. }
        ));
    }

    #[test]
    fn test_status_mapping() {
        let resp = CacheError::UnknownCache("Nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = CacheError::AlreadyPresent("k".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = CacheError::Storage("disk full".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
