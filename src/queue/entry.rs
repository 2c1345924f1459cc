//! Offline queue entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    /// Waiting for replay.
    Pending,
    /// Claimed by the replay worker.
    InFlight,
    /// Replay attempts exhausted; visible in the dead-letter view.
    Failed,
    /// Applied downstream; retained briefly for idempotency-key dedup.
    Completed,
}

impl QueueEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEntryStatus::Pending => "pending",
            QueueEntryStatus::InFlight => "in_flight",
            QueueEntryStatus::Failed => "failed",
            QueueEntryStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(QueueEntryStatus::Pending),
            "in_flight" => Some(QueueEntryStatus::InFlight),
            "failed" => Some(QueueEntryStatus::Failed),
            "completed" => Some(QueueEntryStatus::Completed),
            _ => None,
        }
    }
}

/// One deferred action, created when a write could not reach its dependency.
///
/// Ids are UUIDv7 (time-ordered), so id order matches enqueue order within an
/// owner and the store can sort on the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub owner_id: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub status: QueueEntryStatus,
    pub idempotency_key: String,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(owner_id: String, payload: serde_json::Value, idempotency_key: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            payload,
            enqueued_at: Utc::now(),
            attempt_count: 0,
            status: QueueEntryStatus::Pending,
            idempotency_key,
            completed_at: None,
        }
    }
}
