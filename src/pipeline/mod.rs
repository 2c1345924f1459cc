//! # Scan Pipeline
//!
//! Orchestrates one scan or collection write end to end: quota reservation,
//! the guarded downstream call, outcome recording, and the offline-queue
//! fallback. The control flow is fixed here; every external effect goes
//! through an injected capability so hosts and tests choose the wiring.
//!
//! The availability contract: a submission that cannot reach its dependency
//! is acknowledged as queued ("saved, will sync") rather than failed,
//! provided the failure is deferrable and the owner's queue has room.

use crate::analytics::{AnalyticsAggregator, OutcomeRecord, ScanOutcome};
use crate::config::RetryConfig;
use crate::error::{CoreError, ErrorKind, Result};
use crate::governor::UsageGovernor;
use crate::queue::{OfflineQueue, QueueEntry, ReplayHandler};
use crate::resilience::RetryExecutor;
use crate::services::{Classification, Classifier, CollectionStore, ScanRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Dependency name for the card classifier service.
pub const CLASSIFIER_DEPENDENCY: &str = "classifier";
/// Dependency name for the backend datastore (collections, sync).
pub const DATASTORE_DEPENDENCY: &str = "datastore";

const SCAN_RESOURCE: &str = "scans";

/// Result of a scan submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanResponse {
    /// The classifier answered within the deadline.
    Identified {
        classification: Classification,
        /// Budget left after this scan; `-1` for unlimited tiers.
        remaining: i64,
    },
    /// Saved for replay; the caller should surface "saved, will sync".
    /// `entry_id` is absent when an identical submission was already queued.
    Queued { entry_id: Option<Uuid> },
}

/// Result of a collection write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectionResponse {
    Added,
    Queued { entry_id: Option<Uuid> },
}

/// Payload format for offline-queue entries produced by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueuedAction {
    SubmitScan { request: ScanRequest },
    AddToCollection { card_id: String },
}

/// End-to-end orchestration of scan and collection operations.
pub struct ScanPipeline {
    governor: Arc<UsageGovernor>,
    classifier: Arc<dyn Classifier>,
    collections: Arc<dyn CollectionStore>,
    queue: OfflineQueue,
    executor: RetryExecutor,
    analytics: Arc<AnalyticsAggregator>,
    retry: RetryConfig,
}

impl ScanPipeline {
    pub fn new(
        governor: Arc<UsageGovernor>,
        classifier: Arc<dyn Classifier>,
        collections: Arc<dyn CollectionStore>,
        queue: OfflineQueue,
        executor: RetryExecutor,
        analytics: Arc<AnalyticsAggregator>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            governor,
            classifier,
            collections,
            queue,
            executor,
            analytics,
            retry,
        }
    }

    /// Submit one scan. Reserves quota, calls the classifier under the
    /// retry executor, and defers to the offline queue when the classifier
    /// is unreachable. Terminal classifier failures release the
    /// reservation; queued submissions keep it, since the scan will still
    /// be applied on replay.
    pub async fn submit_scan(
        &self,
        request: ScanRequest,
        deadline: Instant,
    ) -> Result<ScanResponse> {
        let started = std::time::Instant::now();
        let decision = self
            .governor
            .check_and_reserve(&request.user_id, SCAN_RESOURCE, 1, deadline)
            .await?;
        if !decision.allowed {
            self.analytics.record(
                OutcomeRecord::new(&request.user_id, SCAN_RESOURCE, ScanOutcome::Rejected, 0)
                    .with_error_kind(ErrorKind::QuotaExceeded.as_str()),
            );
            return Err(CoreError::QuotaExceeded {
                resource: SCAN_RESOURCE.to_string(),
                remaining: decision.remaining,
            });
        }

        let policy = self.retry.policy_for(CLASSIFIER_DEPENDENCY);
        let classifier = self.classifier.clone();
        let result = self
            .executor
            .execute(CLASSIFIER_DEPENDENCY, policy, deadline, || {
                classifier.identify(&request)
            })
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(classification) => {
                let mut record = OutcomeRecord::new(
                    &request.user_id,
                    SCAN_RESOURCE,
                    ScanOutcome::Success,
                    latency_ms,
                )
                .with_confidence(classification.confidence);
                record = record.with_model_version(&classification.model_version);
                self.analytics.record(record);
                info!(
                    user_id = %request.user_id,
                    card_id = %classification.card_id,
                    confidence = classification.confidence,
                    latency_ms = latency_ms,
                    "Scan identified"
                );
                Ok(ScanResponse::Identified {
                    classification,
                    remaining: decision.remaining,
                })
            }
            Err(e) if e.is_deferrable() => {
                let entry_id = self
                    .defer(
                        &request.user_id,
                        &request.idempotency_key,
                        QueuedAction::SubmitScan {
                            request: request.clone(),
                        },
                    )
                    .await?;
                info!(
                    user_id = %request.user_id,
                    entry_id = ?entry_id,
                    reason = %e,
                    "Scan saved for offline replay"
                );
                Ok(ScanResponse::Queued { entry_id })
            }
            Err(e) => {
                self.release_scan(&request.user_id).await;
                self.analytics.record(
                    OutcomeRecord::new(
                        &request.user_id,
                        SCAN_RESOURCE,
                        ScanOutcome::Error,
                        latency_ms,
                    )
                    .with_error_kind(e.kind().as_str()),
                );
                Err(e)
            }
        }
    }

    /// Add a card to the user's collection, respecting the tier's
    /// collection cap and deferring to the queue when the datastore is
    /// unreachable.
    pub async fn add_to_collection(
        &self,
        user_id: &str,
        card_id: &str,
        idempotency_key: &str,
        deadline: Instant,
    ) -> Result<CollectionResponse> {
        if card_id.is_empty() {
            return Err(CoreError::Validation("card_id must not be empty".into()));
        }

        let cap = self.governor.collection_cap(user_id).await?;
        if cap >= 0 {
            match self.collections.count(user_id).await {
                Ok(count) if count >= cap => {
                    return Err(CoreError::QuotaExceeded {
                        resource: "collection".to_string(),
                        remaining: 0,
                    });
                }
                Ok(_) => {}
                // Cap is re-checked at replay time, so an unreadable count
                // defers rather than blocks the write.
                Err(e) if e.is_deferrable() => {
                    debug!(user_id = %user_id, error = %e, "Collection count unavailable, deferring cap check");
                }
                Err(e) => return Err(e),
            }
        }

        let policy = self.retry.policy_for(DATASTORE_DEPENDENCY);
        let collections = self.collections.clone();
        let result = self
            .executor
            .execute(DATASTORE_DEPENDENCY, policy, deadline, || {
                collections.add(user_id, card_id)
            })
            .await;

        match result {
            Ok(()) => {
                info!(user_id = %user_id, card_id = %card_id, "Card added to collection");
                Ok(CollectionResponse::Added)
            }
            Err(e) if e.is_deferrable() => {
                let entry_id = self
                    .defer(
                        user_id,
                        idempotency_key,
                        QueuedAction::AddToCollection {
                            card_id: card_id.to_string(),
                        },
                    )
                    .await?;
                info!(
                    user_id = %user_id,
                    card_id = %card_id,
                    entry_id = ?entry_id,
                    reason = %e,
                    "Collection write saved for offline replay"
                );
                Ok(CollectionResponse::Queued { entry_id })
            }
            Err(e) => Err(e),
        }
    }

    /// Queue a deferrable action. An identical live submission collapses
    /// into the already-queued entry; a full queue fails fast.
    async fn defer(
        &self,
        owner_id: &str,
        idempotency_key: &str,
        action: QueuedAction,
    ) -> Result<Option<Uuid>> {
        if self
            .queue
            .store()
            .live_key_exists(owner_id, idempotency_key)
            .await?
        {
            debug!(
                owner_id = %owner_id,
                idempotency_key = %idempotency_key,
                "Submission already queued"
            );
            if matches!(action, QueuedAction::SubmitScan { .. }) {
                // The original submission holds the reservation.
                self.release_scan(owner_id).await;
            }
            return Ok(None);
        }

        let payload = serde_json::to_value(&action)?;
        match self.queue.enqueue(owner_id, payload, idempotency_key).await {
            Ok(entry) => Ok(Some(entry.id)),
            Err(e) => {
                if matches!(action, QueuedAction::SubmitScan { .. }) {
                    self.release_scan(owner_id).await;
                }
                Err(e)
            }
        }
    }

    async fn release_scan(&self, user_id: &str) {
        if let Err(e) = self.governor.release(user_id, SCAN_RESOURCE, 1).await {
            warn!(user_id = %user_id, error = %e, "Failed to release scan reservation");
        }
    }
}

/// Applies queued pipeline actions during replay.
pub struct PipelineReplayHandler {
    classifier: Arc<dyn Classifier>,
    collections: Arc<dyn CollectionStore>,
    governor: Arc<UsageGovernor>,
    analytics: Arc<AnalyticsAggregator>,
}

impl PipelineReplayHandler {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        collections: Arc<dyn CollectionStore>,
        governor: Arc<UsageGovernor>,
        analytics: Arc<AnalyticsAggregator>,
    ) -> Self {
        Self {
            classifier,
            collections,
            governor,
            analytics,
        }
    }
}

#[async_trait]
impl ReplayHandler for PipelineReplayHandler {
    async fn apply(&self, entry: &QueueEntry) -> Result<()> {
        let action: QueuedAction = serde_json::from_value(entry.payload.clone())?;
        match action {
            QueuedAction::SubmitScan { request } => {
                let started = std::time::Instant::now();
                let classification = self.classifier.identify(&request).await?;
                self.analytics.record(
                    OutcomeRecord::new(
                        &request.user_id,
                        SCAN_RESOURCE,
                        ScanOutcome::Success,
                        started.elapsed().as_millis() as u64,
                    )
                    .with_confidence(classification.confidence)
                    .with_model_version(&classification.model_version),
                );
                Ok(())
            }
            QueuedAction::AddToCollection { card_id } => {
                let cap = self.governor.collection_cap(&entry.owner_id).await?;
                if cap >= 0 && self.collections.count(&entry.owner_id).await? >= cap {
                    // Terminal: the cap filled up while the write was queued.
                    return Err(CoreError::Validation(format!(
                        "collection cap {cap} reached for owner {}",
                        entry.owner_id
                    )));
                }
                self.collections.add(&entry.owner_id, &card_id).await
            }
        }
    }
}
