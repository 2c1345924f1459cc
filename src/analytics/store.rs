//! Durable storage for outcome records.
//!
//! The aggregator keeps its rolling buckets in memory and rebuilds them
//! from this store on startup; the store itself is append-only.

use super::record::{OutcomeRecord, ScanOutcome};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn append_batch(&self, records: &[OutcomeRecord]) -> Result<()>;

    /// Records with `timestamp >= since`, oldest first.
    async fn records_since(&self, since: DateTime<Utc>) -> Result<Vec<OutcomeRecord>>;
}

/// Process-local outcome store for tests and disconnected operation.
#[derive(Debug, Default)]
pub struct MemoryOutcomeStore {
    records: Mutex<Vec<OutcomeRecord>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn append_batch(&self, records: &[OutcomeRecord]) -> Result<()> {
        self.records.lock().extend_from_slice(records);
        Ok(())
    }

    async fn records_since(&self, since: DateTime<Utc>) -> Result<Vec<OutcomeRecord>> {
        let records = self.records.lock();
        let mut matching: Vec<OutcomeRecord> = records
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.id);
        Ok(matching)
    }
}

/// Postgres-backed outcome store.
#[derive(Debug, Clone)]
pub struct PgOutcomeStore {
    pool: PgPool,
}

impl PgOutcomeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table when it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_outcomes (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                resource TEXT NOT NULL,
                confidence DOUBLE PRECISION,
                latency_ms BIGINT NOT NULL,
                outcome TEXT NOT NULL,
                error_kind TEXT,
                model_version TEXT,
                timestamp TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scan_outcomes_timestamp ON scan_outcomes (timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Result<OutcomeRecord> {
        let outcome_text: String = row.try_get("outcome")?;
        let latency_ms: i64 = row.try_get("latency_ms")?;

        Ok(OutcomeRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            resource: row.try_get("resource")?,
            confidence: row.try_get("confidence")?,
            latency_ms: latency_ms.max(0) as u64,
            outcome: ScanOutcome::parse(&outcome_text),
            error_kind: row.try_get("error_kind")?,
            model_version: row.try_get("model_version")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

#[async_trait]
impl OutcomeStore for PgOutcomeStore {
    async fn append_batch(&self, records: &[OutcomeRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO scan_outcomes
                    (id, user_id, resource, confidence, latency_ms, outcome,
                     error_kind, model_version, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(record.id)
            .bind(&record.user_id)
            .bind(&record.resource)
            .bind(record.confidence)
            .bind(record.latency_ms as i64)
            .bind(record.outcome.as_str())
            .bind(&record.error_kind)
            .bind(&record.model_version)
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    async fn records_since(&self, since: DateTime<Utc>) -> Result<Vec<OutcomeRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM scan_outcomes WHERE timestamp >= $1 ORDER BY id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
