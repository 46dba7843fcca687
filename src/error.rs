//! Error types for the cache
//!
//! Provides unified error handling using thiserror. Errors are `Clone` so a
//! single failed computation can be delivered to every caller waiting on it.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache and its HTTP surface.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The compute closure returned an error
    #[error("Computation for key '{key}' failed: {cause:#}")]
    ComputeFailed {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    /// The compute closure panicked
    #[error("Computation for key '{key}' panicked")]
    ComputePanicked { key: String },

    /// The computation was dropped before it finished
    #[error("Computation for key '{key}' was cancelled")]
    ComputeCancelled { key: String },

    /// The key's computation is still running
    #[error("Key '{key}' is being computed")]
    InFlight { key: String },

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps a compute failure for `key`.
    pub fn compute_failed(key: impl Into<String>, cause: anyhow::Error) -> Self {
        CacheError::ComputeFailed {
            key: key.into(),
            cause: Arc::new(cause),
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::ComputeFailed { .. } | CacheError::ComputePanicked { .. } => {
                StatusCode::BAD_GATEWAY
            }
            CacheError::ComputeCancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::InFlight { .. } => StatusCode::CONFLICT,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
