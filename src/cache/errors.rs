//! Cache error types.

use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to connect to cache backend
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    BackendError(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for crate::error::CoreError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::ConnectionError(msg) => crate::error::CoreError::Transient(msg),
            other => crate::error::CoreError::Cache(other.to_string()),
        }
    }
}
