//! Bounded per-owner offline queue.

use super::entry::QueueEntry;
use super::store::QueueStore;
use crate::config::QueueConfig;
use crate::error::{CoreError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Accepts actions performed without connectivity and hands them to the
/// replay worker later.
///
/// The queue is bounded per owner; at the cap, `enqueue` fails fast with
/// [`CoreError::QueueFull`] rather than silently evicting, because silent
/// data loss is worse than a user-visible failure.
#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<dyn QueueStore>,
    config: QueueConfig,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append a deferred action for `owner_id`.
    ///
    /// Idempotency keys are unique per owner: while an earlier entry with
    /// the same key is live (queued, in flight, or completed within the
    /// dedup grace period), a duplicate enqueue is rejected and the original
    /// stays queued.
    pub async fn enqueue(
        &self,
        owner_id: &str,
        payload: serde_json::Value,
        idempotency_key: &str,
    ) -> Result<QueueEntry> {
        if owner_id.is_empty() {
            return Err(CoreError::Validation("owner_id must not be empty".into()));
        }
        if idempotency_key.is_empty() {
            return Err(CoreError::Validation(
                "idempotency_key must not be empty".into(),
            ));
        }

        if self.store.live_key_exists(owner_id, idempotency_key).await? {
            debug!(
                owner_id = owner_id,
                idempotency_key = idempotency_key,
                "Duplicate enqueue rejected"
            );
            return Err(CoreError::Validation(format!(
                "idempotency key '{idempotency_key}' already queued for this owner"
            )));
        }

        let active = self.store.active_count(owner_id).await?;
        if active >= self.config.max_entries_per_owner {
            return Err(CoreError::QueueFull(owner_id.to_string()));
        }

        let entry = QueueEntry::new(
            owner_id.to_string(),
            payload,
            idempotency_key.to_string(),
        );
        self.store.insert(&entry).await?;

        info!(
            owner_id = owner_id,
            entry_id = %entry.id,
            queued = active + 1,
            "Action queued for offline replay"
        );
        Ok(entry)
    }

    /// Pending entries for one owner in enqueue order (restartable cursor:
    /// callers re-invoke after processing a batch).
    pub async fn drain_batch(&self, owner_id: &str, limit: i64) -> Result<Vec<QueueEntry>> {
        self.store.pending_for_owner(owner_id, limit).await
    }

    /// Dead-lettered entries for operator inspection.
    pub async fn dead_letters(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueEntry>> {
        self.store.dead_letters(owner_id, limit, offset).await
    }

    /// Active (pending + in-flight) entries across all owners.
    pub async fn size(&self) -> Result<usize> {
        self.store.total_active_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::store::MemoryQueueStore;

    fn queue(cap: usize) -> OfflineQueue {
        let config = QueueConfig {
            max_entries_per_owner: cap,
            ..Default::default()
        };
        OfflineQueue::new(Arc::new(MemoryQueueStore::new()), config)
    }

    #[tokio::test]
    async fn enqueue_and_drain_in_order() {
        let queue = queue(10);
        for i in 0..3 {
            queue
                .enqueue("u1", serde_json::json!({ "seq": i }), &format!("k{i}"))
                .await
                .unwrap();
        }

        let batch = queue.drain_batch("u1", 10).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].payload["seq"], 0);
        assert_eq!(batch[2].payload["seq"], 2);
    }

    #[tokio::test]
    async fn enqueue_past_cap_fails_fast() {
        let queue = queue(2);
        queue.enqueue("u1", serde_json::json!({}), "k1").await.unwrap();
        queue.enqueue("u1", serde_json::json!({}), "k2").await.unwrap();

        let result = queue.enqueue("u1", serde_json::json!({}), "k3").await;
        assert!(matches!(result, Err(CoreError::QueueFull(_))));

        // Existing entries are intact, and other owners are unaffected
        assert_eq!(queue.drain_batch("u1", 10).await.unwrap().len(), 2);
        queue.enqueue("u2", serde_json::json!({}), "k1").await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_rejected() {
        let queue = queue(10);
        queue.enqueue("u1", serde_json::json!({}), "k1").await.unwrap();

        let result = queue.enqueue("u1", serde_json::json!({}), "k1").await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
        assert_eq!(queue.size().await.unwrap(), 1);

        // Same key for another owner is fine
        queue.enqueue("u2", serde_json::json!({}), "k1").await.unwrap();
    }

    #[tokio::test]
    async fn empty_inputs_rejected() {
        let queue = queue(10);
        assert!(queue.enqueue("", serde_json::json!({}), "k").await.is_err());
        assert!(queue.enqueue("u1", serde_json::json!({}), "").await.is_err());
    }
}
