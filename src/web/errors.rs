//! Web API error types and their HTTP response conversions.

use crate::error::CoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Web-layer errors with HTTP status code mappings.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Usage limit reached for {resource}")]
    QuotaExceeded { resource: String, remaining: i64 },

    #[error("Offline queue full for {owner_id}")]
    QueueFull { owner_id: String },

    #[error("Service temporarily unavailable")]
    ServiceUnavailable,

    #[error("Request timeout")]
    Timeout,

    #[error("Internal server error")]
    Internal { message: String },
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Validation(message) => ApiError::BadRequest { message },
            CoreError::QuotaExceeded {
                resource,
                remaining,
            } => ApiError::QuotaExceeded {
                resource,
                remaining,
            },
            CoreError::QueueFull(owner_id) => ApiError::QueueFull { owner_id },
            CoreError::Transient(_) | CoreError::CircuitOpen(_) => ApiError::ServiceUnavailable,
            CoreError::DeadlineExceeded(_) => ApiError::Timeout,
            other => ApiError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Quota rejections carry machine-readable budget context.
        if let ApiError::QuotaExceeded {
            resource,
            remaining,
        } = &self
        {
            let body = json!({
                "error": {
                    "code": "QUOTA_EXCEEDED",
                    "message": format!("Usage limit reached for {resource}"),
                    "resource": resource,
                    "remaining": remaining
                }
            });
            return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        }

        let (status_code, error_code, message) = match &self {
            ApiError::NotFound { message } => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", message.clone())
            }
            ApiError::BadRequest { message } => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message.clone())
            }
            ApiError::QueueFull { owner_id } => (
                StatusCode::TOO_MANY_REQUESTS,
                "QUEUE_FULL",
                format!("Offline queue full for {owner_id}"),
            ),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Service temporarily unavailable".to_string(),
            ),
            ApiError::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                "TIMEOUT",
                "Request timeout".to_string(),
            ),
            ApiError::Internal { message } => {
                tracing::error!(error = %message, "Internal error surfaced to web API");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
            ApiError::QuotaExceeded { .. } => unreachable!("handled above"),
        };

        let body = json!({
            "error": {
                "code": error_code,
                "message": message
            }
        });
        (status_code, Json(body)).into_response()
    }
}
