use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for Quire operations
///
/// Cloneable so it can be published inside observable query and mutation
/// state; payloads are carried as rendered strings for the same reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuireError {
    #[error("Cache miss: {0}")]
    CacheMiss(String),

    #[error("Invalid backend: {0}")]
    InvalidBackend(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid TTL: {0}")]
    TTLInvalid(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Storage quota exceeded: {used} of {quota} bytes")]
    QuotaExceeded { used: usize, quota: usize },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Mutation failed: {0}")]
    MutationFailed(String),

    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),
}

impl QuireError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CacheMiss(_) | Self::ItemNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidBackend(_) | Self::InvalidValue(_) | Self::TTLInvalid(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::DuplicateIdentity(_) => StatusCode::CONFLICT,
            Self::QuotaExceeded { .. } => StatusCode::INSUFFICIENT_STORAGE,
            Self::FetchFailed(_) | Self::MutationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::StorageError(_) | Self::SerializationError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code used in JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::CacheMiss(_) => "cache_miss",
            Self::InvalidBackend(_) => "invalid_backend",
            Self::InvalidValue(_) => "invalid_value",
            Self::TTLInvalid(_) => "invalid_ttl",
            Self::StorageError(_) => "storage_error",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::SerializationError(_) => "serialization_error",
            Self::FetchFailed(_) => "fetch_failed",
            Self::MutationFailed(_) => "mutation_failed",
            Self::DuplicateIdentity(_) => "duplicate_identity",
            Self::ItemNotFound(_) => "item_not_found",
        }
    }
}

impl From<serde_json::Error> for QuireError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for QuireError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

/// Implement IntoResponse for Axum integration
impl IntoResponse for QuireError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for Quire operations
pub type Result<T> = std::result::Result<T, QuireError>;
