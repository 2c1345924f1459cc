//! Liveness endpoint.

use axum::Json;
use serde_json::json;

/// `GET /health` - process is up and serving.
pub async fn basic_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
