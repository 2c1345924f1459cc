//! Card classifier capability.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single scan submission: the image is referenced, never embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub user_id: String,
    /// Opaque reference to the captured image (object-store key or URL).
    pub image_ref: String,
    /// Client-generated key; replays of the same capture carry the same key.
    pub idempotency_key: String,
}

/// Classifier verdict for one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub card_id: String,
    pub card_name: String,
    /// Match confidence in `0.0..=1.0`.
    pub confidence: f64,
    pub model_version: String,
}

/// Identifies the card in a captured image.
///
/// Implementations map their own failure modes onto the core error
/// taxonomy: network and timeout failures as `Transient`, malformed input
/// as `Validation`. The pipeline wraps calls in the health monitor and
/// retry executor, so implementations should not retry internally.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn identify(&self, request: &ScanRequest) -> Result<Classification>;
}
