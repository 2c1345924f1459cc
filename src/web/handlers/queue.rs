//! Offline queue administration endpoints.

use crate::queue::QueueEntry;
use crate::web::errors::ApiResult;
use crate::web::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// `POST /v1/queue/:owner_id/drain`
///
/// Requests an immediate replay of the owner's pending entries. The drain
/// runs asynchronously; 202 means scheduled, not done.
pub async fn drain_owner(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    info!(owner_id = %owner_id, "Manual queue drain requested");
    state.drain.request(Some(owner_id.clone()));
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "drain_requested", "owner_id": owner_id })),
    )
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterBody {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
}

impl From<QueueEntry> for DeadLetterBody {
    fn from(entry: QueueEntry) -> Self {
        Self {
            id: entry.id,
            enqueued_at: entry.enqueued_at,
            attempt_count: entry.attempt_count,
            idempotency_key: entry.idempotency_key,
            payload: entry.payload,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeadLetterResponse {
    pub owner_id: String,
    pub entries: Vec<DeadLetterBody>,
}

/// `GET /v1/queue/:owner_id/dead-letters`
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Query(params): Query<DeadLetterParams>,
) -> ApiResult<Json<DeadLetterResponse>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let offset = params.offset.unwrap_or(0).max(0);

    let entries = state.queue.dead_letters(&owner_id, limit, offset).await?;
    Ok(Json(DeadLetterResponse {
        owner_id,
        entries: entries.into_iter().map(DeadLetterBody::from).collect(),
    }))
}
