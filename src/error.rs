//! Error types for the scandeck resilience core.
//!
//! The taxonomy mirrors how callers must react: transient and circuit-open
//! failures are retryable (and deferrable for writes), everything else is
//! terminal for the current request and propagates to the caller with enough
//! structure to render user guidance.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Timeouts, connection resets, 5xx-class failures. Retryable.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A dependency is deliberately bypassed by its circuit breaker.
    /// Not retryable on the same call path, but the work may be queued.
    #[error("Circuit open for dependency '{0}'")]
    CircuitOpen(String),

    /// The user's tier limit is reached for this period. Terminal, user-visible.
    #[error("Quota exceeded for resource '{resource}': {remaining} remaining")]
    QuotaExceeded { resource: String, remaining: i64 },

    /// The per-owner offline queue is at capacity. Terminal, signals backpressure.
    #[error("Offline queue full for owner '{0}'")]
    QueueFull(String),

    /// Caller's fault. Terminal.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation's deadline elapsed (or would elapse before the next
    /// attempt could complete). Terminal; callers should back off further.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification used by the retry executor and the web layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Transient,
    CircuitOpen,
    QuotaExceeded,
    QueueFull,
    Validation,
    DeadlineExceeded,
    Database,
    Cache,
    Configuration,
    Internal,
}

impl ErrorKind {
    /// Stable label used in analytics breakdowns and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::Validation => "validation",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Database => "database",
            ErrorKind::Cache => "cache",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        }
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Transient(_) => ErrorKind::Transient,
            CoreError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            CoreError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            CoreError::QueueFull(_) => ErrorKind::QueueFull,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            CoreError::Database(_) => ErrorKind::Database,
            CoreError::Cache(_) => ErrorKind::Cache,
            CoreError::Configuration(_) => ErrorKind::Configuration,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the retry executor may attempt this operation again.
    ///
    /// Only transient failures and circuit-open rejections are retryable;
    /// a circuit-open error retried later may find the breaker half-open.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Transient(_) | CoreError::CircuitOpen(_)
        )
    }

    /// Whether a failed write carrying this error may be deferred to the
    /// offline queue instead of surfacing to the caller.
    pub fn is_deferrable(&self) -> bool {
        self.is_retryable() || matches!(self, CoreError::DeadlineExceeded(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        CoreError::Validation(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                CoreError::Transient(err.to_string())
            }
            _ => CoreError::Database(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
