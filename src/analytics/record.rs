//! Outcome record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal result of one scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Success,
    Rejected,
    Error,
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Success => "success",
            ScanOutcome::Rejected => "rejected",
            ScanOutcome::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "success" => ScanOutcome::Success,
            "rejected" => ScanOutcome::Rejected,
            _ => ScanOutcome::Error,
        }
    }
}

/// Append-only record of one scan attempt. Records are immutable once
/// written; aggregates are derived, never stored back onto the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: Uuid,
    pub user_id: String,
    pub resource: String,
    /// Classifier confidence; absent for rejected and errored attempts.
    pub confidence: Option<f64>,
    pub latency_ms: u64,
    pub outcome: ScanOutcome,
    pub error_kind: Option<String>,
    pub model_version: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        user_id: impl Into<String>,
        resource: impl Into<String>,
        outcome: ScanOutcome,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            resource: resource.into(),
            confidence: None,
            latency_ms,
            outcome,
            error_kind: None,
            model_version: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }
}
