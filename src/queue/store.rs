//! Durable storage for queue entries.
//!
//! Entries must survive process restart, so the production store is a
//! Postgres table. The in-memory store backs tests and fully disconnected
//! single-process operation.

use super::entry::{QueueEntry, QueueEntryStatus};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Persistence operations the offline queue and replay worker need.
///
/// `pending_for_owner` must return entries in enqueue order; everything else
/// is unordered. An owner's active set is its Pending + InFlight entries.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn insert(&self, entry: &QueueEntry) -> Result<()>;

    /// Pending entries for one owner, oldest first, up to `limit`.
    async fn pending_for_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<QueueEntry>>;

    /// Owners that currently have pending entries.
    async fn owners_with_pending(&self) -> Result<Vec<String>>;

    /// Claim an entry for replay: Pending -> InFlight, attempt_count + 1.
    async fn mark_in_flight(&self, id: Uuid) -> Result<()>;

    /// Return a claimed entry to the queue without consuming an attempt's
    /// worth of dead-letter budget (the dependency went down again).
    async fn mark_pending(&self, id: Uuid) -> Result<()>;

    async fn mark_completed(&self, id: Uuid) -> Result<()>;

    async fn mark_failed(&self, id: Uuid) -> Result<()>;

    /// Dead-lettered (Failed) entries for one owner, oldest first.
    async fn dead_letters(&self, owner_id: &str, limit: i64, offset: i64)
        -> Result<Vec<QueueEntry>>;

    /// Pending + InFlight count for one owner (the bounded set).
    async fn active_count(&self, owner_id: &str) -> Result<usize>;

    /// Pending + InFlight count across all owners.
    async fn total_active_count(&self) -> Result<usize>;

    /// Whether a live (not Failed, not purged) entry with this idempotency
    /// key exists for the owner.
    async fn live_key_exists(&self, owner_id: &str, idempotency_key: &str) -> Result<bool>;

    /// Drop Completed entries whose grace period has passed. Returns the
    /// number removed.
    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local queue store for tests and disconnected operation.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    entries: Mutex<Vec<QueueEntry>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_status(&self, id: Uuid, status: QueueEntryStatus, bump_attempts: bool) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| CoreError::Internal(format!("queue entry {id} not found")))?;
        entry.status = status;
        if bump_attempts {
            entry.attempt_count += 1;
        }
        if status == QueueEntryStatus::Completed {
            entry.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, entry: &QueueEntry) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    async fn pending_for_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<QueueEntry>> {
        let entries = self.entries.lock();
        let mut pending: Vec<QueueEntry> = entries
            .iter()
            .filter(|e| e.owner_id == owner_id && e.status == QueueEntryStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.id);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn owners_with_pending(&self) -> Result<Vec<String>> {
        let entries = self.entries.lock();
        let mut owners: Vec<String> = entries
            .iter()
            .filter(|e| e.status == QueueEntryStatus::Pending)
            .map(|e| e.owner_id.clone())
            .collect();
        owners.sort();
        owners.dedup();
        Ok(owners)
    }

    async fn mark_in_flight(&self, id: Uuid) -> Result<()> {
        self.update_status(id, QueueEntryStatus::InFlight, true)
    }

    async fn mark_pending(&self, id: Uuid) -> Result<()> {
        self.update_status(id, QueueEntryStatus::Pending, false)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<()> {
        self.update_status(id, QueueEntryStatus::Completed, false)
    }

    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        self.update_status(id, QueueEntryStatus::Failed, false)
    }

    async fn dead_letters(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueEntry>> {
        let entries = self.entries.lock();
        let mut failed: Vec<QueueEntry> = entries
            .iter()
            .filter(|e| e.owner_id == owner_id && e.status == QueueEntryStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|e| e.id);
        Ok(failed
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn active_count(&self, owner_id: &str) -> Result<usize> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|e| {
                e.owner_id == owner_id
                    && matches!(
                        e.status,
                        QueueEntryStatus::Pending | QueueEntryStatus::InFlight
                    )
            })
            .count())
    }

    async fn total_active_count(&self) -> Result<usize> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|e| {
                matches!(
                    e.status,
                    QueueEntryStatus::Pending | QueueEntryStatus::InFlight
                )
            })
            .count())
    }

    async fn live_key_exists(&self, owner_id: &str, idempotency_key: &str) -> Result<bool> {
        let entries = self.entries.lock();
        Ok(entries.iter().any(|e| {
            e.owner_id == owner_id
                && e.idempotency_key == idempotency_key
                && e.status != QueueEntryStatus::Failed
        }))
    }

    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| {
            !(e.status == QueueEntryStatus::Completed
                && e.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        Ok((before - entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

/// Postgres-backed queue store.
#[derive(Debug, Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table when it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_queue_entries (
                id UUID PRIMARY KEY,
                owner_id TEXT NOT NULL,
                payload JSONB NOT NULL,
                enqueued_at TIMESTAMPTZ NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                completed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_offline_queue_owner_status
            ON offline_queue_entries (owner_id, status, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_entry(row: &PgRow) -> Result<QueueEntry> {
        let status_text: String = row.try_get("status")?;
        let status = QueueEntryStatus::parse(&status_text).ok_or_else(|| {
            CoreError::Database(format!("unknown queue entry status '{status_text}'"))
        })?;

        Ok(QueueEntry {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            payload: row.try_get("payload")?,
            enqueued_at: row.try_get("enqueued_at")?,
            attempt_count: row.try_get("attempt_count")?,
            status,
            idempotency_key: row.try_get("idempotency_key")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    async fn set_status(&self, id: Uuid, status: QueueEntryStatus, bump_attempts: bool) -> Result<()> {
        let sql = if bump_attempts {
            "UPDATE offline_queue_entries
             SET status = $2, attempt_count = attempt_count + 1
             WHERE id = $1"
        } else if status == QueueEntryStatus::Completed {
            "UPDATE offline_queue_entries
             SET status = $2, completed_at = NOW()
             WHERE id = $1"
        } else {
            "UPDATE offline_queue_entries SET status = $2 WHERE id = $1"
        };

        let result = sqlx::query(sql)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Database(format!("queue entry {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn insert(&self, entry: &QueueEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO offline_queue_entries
                (id, owner_id, payload, enqueued_at, attempt_count, status,
                 idempotency_key, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.owner_id)
        .bind(&entry.payload)
        .bind(entry.enqueued_at)
        .bind(entry.attempt_count)
        .bind(entry.status.as_str())
        .bind(&entry.idempotency_key)
        .bind(entry.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_for_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM offline_queue_entries
            WHERE owner_id = $1 AND status = 'pending'
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn owners_with_pending(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT owner_id FROM offline_queue_entries WHERE status = 'pending'",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("owner_id").map_err(CoreError::from))
            .collect()
    }

    async fn mark_in_flight(&self, id: Uuid) -> Result<()> {
        self.set_status(id, QueueEntryStatus::InFlight, true).await
    }

    async fn mark_pending(&self, id: Uuid) -> Result<()> {
        self.set_status(id, QueueEntryStatus::Pending, false).await
    }

    async fn mark_completed(&self, id: Uuid) -> Result<()> {
        self.set_status(id, QueueEntryStatus::Completed, false).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<()> {
        self.set_status(id, QueueEntryStatus::Failed, false).await
    }

    async fn dead_letters(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM offline_queue_entries
            WHERE owner_id = $1 AND status = 'failed'
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn active_count(&self, owner_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM offline_queue_entries
            WHERE owner_id = $1 AND status IN ('pending', 'in_flight')
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn total_active_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM offline_queue_entries WHERE status IN ('pending', 'in_flight')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn live_key_exists(&self, owner_id: &str, idempotency_key: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM offline_queue_entries
                WHERE owner_id = $1 AND idempotency_key = $2 AND status != 'failed'
            )
            "#,
        )
        .bind(owner_id)
        .bind(idempotency_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM offline_queue_entries WHERE status = 'completed' AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_fifo_per_owner() {
        let store = MemoryQueueStore::new();
        for i in 0..3 {
            let entry = QueueEntry::new(
                "u1".into(),
                serde_json::json!({ "seq": i }),
                format!("k{i}"),
            );
            store.insert(&entry).await.unwrap();
        }
        let entry_other = QueueEntry::new("u2".into(), serde_json::json!({}), "k0".into());
        store.insert(&entry_other).await.unwrap();

        let pending = store.pending_for_owner("u1", 10).await.unwrap();
        assert_eq!(pending.len(), 3);
        for (i, entry) in pending.iter().enumerate() {
            assert_eq!(entry.payload["seq"], i as i64);
        }

        let owners = store.owners_with_pending().await.unwrap();
        assert_eq!(owners, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[tokio::test]
    async fn memory_store_lifecycle() {
        let store = MemoryQueueStore::new();
        let entry = QueueEntry::new("u1".into(), serde_json::json!({}), "k1".into());
        store.insert(&entry).await.unwrap();

        store.mark_in_flight(entry.id).await.unwrap();
        assert_eq!(store.active_count("u1").await.unwrap(), 1);
        assert!(store.pending_for_owner("u1", 10).await.unwrap().is_empty());

        store.mark_completed(entry.id).await.unwrap();
        assert_eq!(store.active_count("u1").await.unwrap(), 0);
        assert!(store.live_key_exists("u1", "k1").await.unwrap());

        // Purge after grace removes the key from the live set
        let purged = store
            .purge_completed_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(!store.live_key_exists("u1", "k1").await.unwrap());
    }

    #[tokio::test]
    async fn failed_entries_are_dead_letters_not_live() {
        let store = MemoryQueueStore::new();
        let entry = QueueEntry::new("u1".into(), serde_json::json!({}), "k1".into());
        store.insert(&entry).await.unwrap();
        store.mark_in_flight(entry.id).await.unwrap();
        store.mark_failed(entry.id).await.unwrap();

        let dead = store.dead_letters("u1", 10, 0).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempt_count, 1);
        assert!(!store.live_key_exists("u1", "k1").await.unwrap());
    }
}
