//! Rolling analytics over scan outcomes.
//!
//! Recording is fire-and-forget: callers push into a bounded channel and a
//! background task batches writes to the durable store while folding each
//! record into per-UTC-day aggregate buckets. Queries read only the
//! buckets, so cost scales with the window length, not the record count.

use super::record::{OutcomeRecord, ScanOutcome};
use super::store::OutcomeStore;
use crate::config::AnalyticsConfig;
use crate::error::Result;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const HISTOGRAM_BANDS: usize = 10;

/// Incremental moments for one metric. Mean and standard deviation are
/// derived at query time from count, sum and sum of squares.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NumericStats {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericStats {
    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn merge(&mut self, other: &NumericStats) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn stddev(&self) -> Option<f64> {
        self.mean()
            .map(|mean| (self.sum_sq / self.count as f64 - mean * mean).max(0.0).sqrt())
    }
}

/// Aggregates for one UTC day.
#[derive(Debug, Clone, Default)]
struct DayBucket {
    total: u64,
    success: u64,
    rejected: u64,
    error: u64,
    confidence: NumericStats,
    latency_ms: NumericStats,
    confidence_histogram: [u64; HISTOGRAM_BANDS],
    per_resource: HashMap<String, u64>,
    per_error_kind: HashMap<String, u64>,
    scans_per_user: HashMap<String, u64>,
}

impl DayBucket {
    fn fold(&mut self, record: &OutcomeRecord) {
        self.total += 1;
        match record.outcome {
            ScanOutcome::Success => self.success += 1,
            ScanOutcome::Rejected => self.rejected += 1,
            ScanOutcome::Error => self.error += 1,
        }
        if let Some(confidence) = record.confidence {
            self.confidence.observe(confidence);
            self.confidence_histogram[confidence_band(confidence)] += 1;
        }
        self.latency_ms.observe(record.latency_ms as f64);
        *self.per_resource.entry(record.resource.clone()).or_default() += 1;
        if let Some(kind) = &record.error_kind {
            *self.per_error_kind.entry(kind.clone()).or_default() += 1;
        }
        if record.outcome == ScanOutcome::Success {
            *self.scans_per_user.entry(record.user_id.clone()).or_default() += 1;
        }
    }
}

/// Band index for a confidence value; bands are `[0.0, 0.1) .. [0.9, 1.0]`.
fn confidence_band(confidence: f64) -> usize {
    ((confidence.clamp(0.0, 1.0) * HISTOGRAM_BANDS as f64) as usize).min(HISTOGRAM_BANDS - 1)
}

/// Window summary returned by [`AnalyticsAggregator::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingStats {
    pub window_days: u32,
    pub total: u64,
    pub success: u64,
    pub rejected: u64,
    pub error: u64,
    pub success_rate: f64,
    pub confidence: NumericStats,
    pub confidence_histogram: [u64; HISTOGRAM_BANDS],
    pub latency_ms: NumericStats,
    pub per_resource: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub scans: u64,
}

/// Fire-and-forget outcome recorder with rolling day-bucket aggregates.
pub struct AnalyticsAggregator {
    store: Arc<dyn OutcomeStore>,
    config: AnalyticsConfig,
    buckets: RwLock<BTreeMap<NaiveDate, DayBucket>>,
    tx: mpsc::Sender<OutcomeRecord>,
    rx: Mutex<Option<mpsc::Receiver<OutcomeRecord>>>,
    dropped: AtomicU64,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn OutcomeStore>, config: AnalyticsConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_capacity);
        Self {
            store,
            config,
            buckets: RwLock::new(BTreeMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a record for the flush task. Never blocks the caller; when the
    /// buffer is full the record is counted as dropped and the request path
    /// proceeds unaffected.
    pub fn record(&self, record: OutcomeRecord) {
        if self.tx.try_send(record).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped_total = dropped, "Analytics buffer full, record dropped");
        }
    }

    /// Records dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Rebuild buckets from the durable store, typically once at startup.
    pub async fn rehydrate(&self, window_days: u32) -> Result<usize> {
        let since = Utc::now() - ChronoDuration::days(window_days as i64);
        let records = self.store.records_since(since).await?;
        let mut buckets = self.buckets.write();
        for record in &records {
            buckets
                .entry(record.timestamp.date_naive())
                .or_default()
                .fold(record);
        }
        info!(records = records.len(), window_days = window_days, "Analytics buckets rehydrated");
        Ok(records.len())
    }

    /// Flush loop; runs until shutdown, flushing on the configured interval
    /// or as soon as the batch size is reached.
    pub async fn run_flush_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self
            .rx
            .lock()
            .take()
            .expect("analytics flush loop started twice");
        let mut interval = tokio::time::interval(self.config.flush_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buffer: Vec<OutcomeRecord> = Vec::with_capacity(self.config.flush_batch_size);

        info!(
            flush_interval_ms = self.config.flush_interval_ms,
            flush_batch_size = self.config.flush_batch_size,
            "Analytics flush loop started"
        );
        loop {
            tokio::select! {
                record = rx.recv() => {
                    match record {
                        Some(record) => {
                            buffer.push(record);
                            if buffer.len() >= self.config.flush_batch_size {
                                self.flush(&mut buffer).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = interval.tick() => {
                    self.flush(&mut buffer).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        // Drain whatever is still buffered so shutdown loses nothing.
        while let Ok(record) = rx.try_recv() {
            buffer.push(record);
        }
        self.flush(&mut buffer).await;
        info!("Analytics flush loop stopped");
    }

    async fn flush(&self, buffer: &mut Vec<OutcomeRecord>) {
        if buffer.is_empty() {
            return;
        }
        if let Err(e) = self.store.append_batch(buffer).await {
            // Aggregates still advance; durable history has a gap.
            warn!(records = buffer.len(), error = %e, "Outcome batch write failed");
        }
        let mut buckets = self.buckets.write();
        for record in buffer.iter() {
            buckets
                .entry(record.timestamp.date_naive())
                .or_default()
                .fold(record);
        }
        drop(buckets);
        debug!(records = buffer.len(), "Outcome batch flushed");
        buffer.clear();
    }

    /// Fold a record into the buckets synchronously. Test seam; production
    /// callers go through [`record`](Self::record) and the flush loop.
    pub fn fold_now(&self, record: &OutcomeRecord) {
        self.buckets
            .write()
            .entry(record.timestamp.date_naive())
            .or_default()
            .fold(record);
    }

    pub fn stats(&self, window_days: u32) -> RollingStats {
        let mut stats = RollingStats {
            window_days,
            total: 0,
            success: 0,
            rejected: 0,
            error: 0,
            success_rate: 0.0,
            confidence: NumericStats::default(),
            confidence_histogram: [0; HISTOGRAM_BANDS],
            latency_ms: NumericStats::default(),
            per_resource: HashMap::new(),
        };

        let buckets = self.buckets.read();
        for bucket in self.window(&buckets, window_days) {
            stats.total += bucket.total;
            stats.success += bucket.success;
            stats.rejected += bucket.rejected;
            stats.error += bucket.error;
            stats.confidence.merge(&bucket.confidence);
            stats.latency_ms.merge(&bucket.latency_ms);
            for (band, count) in bucket.confidence_histogram.iter().enumerate() {
                stats.confidence_histogram[band] += count;
            }
            for (resource, count) in &bucket.per_resource {
                *stats.per_resource.entry(resource.clone()).or_default() += count;
            }
        }
        if stats.total > 0 {
            stats.success_rate = stats.success as f64 / stats.total as f64;
        }
        stats
    }

    /// Users ranked by successful scans inside the window.
    pub fn leaderboard(&self, window_days: u32, top_n: usize) -> Vec<LeaderboardEntry> {
        let mut totals: HashMap<String, u64> = HashMap::new();
        let buckets = self.buckets.read();
        for bucket in self.window(&buckets, window_days) {
            for (user_id, count) in &bucket.scans_per_user {
                *totals.entry(user_id.clone()).or_default() += count;
            }
        }
        drop(buckets);

        let mut entries: Vec<LeaderboardEntry> = totals
            .into_iter()
            .map(|(user_id, scans)| LeaderboardEntry { user_id, scans })
            .collect();
        // Ties break on user id so the ranking is stable across calls.
        entries.sort_by(|a, b| b.scans.cmp(&a.scans).then_with(|| a.user_id.cmp(&b.user_id)));
        entries.truncate(top_n);
        entries
    }

    /// Error counts by kind inside the window.
    pub fn error_breakdown(&self, window_days: u32) -> HashMap<String, u64> {
        let mut totals: HashMap<String, u64> = HashMap::new();
        let buckets = self.buckets.read();
        for bucket in self.window(&buckets, window_days) {
            for (kind, count) in &bucket.per_error_kind {
                *totals.entry(kind.clone()).or_default() += count;
            }
        }
        totals
    }

    fn window<'a>(
        &self,
        buckets: &'a BTreeMap<NaiveDate, DayBucket>,
        window_days: u32,
    ) -> impl Iterator<Item = &'a DayBucket> {
        let first_day = (Utc::now() - ChronoDuration::days(window_days.saturating_sub(1) as i64))
            .date_naive();
        buckets.range(first_day..).map(|(_, bucket)| bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::store::MemoryOutcomeStore;

    fn aggregator() -> AnalyticsAggregator {
        AnalyticsAggregator::new(
            Arc::new(MemoryOutcomeStore::new()),
            AnalyticsConfig::default(),
        )
    }

    fn success(user: &str, confidence: f64, latency: u64) -> OutcomeRecord {
        OutcomeRecord::new(user, "scans", ScanOutcome::Success, latency)
            .with_confidence(confidence)
            .with_model_version("cardnet-v3")
    }

    #[test]
    fn stats_fold_counts_and_moments() {
        let agg = aggregator();
        agg.fold_now(&success("u1", 0.95, 120));
        agg.fold_now(&success("u2", 0.85, 80));
        agg.fold_now(
            &OutcomeRecord::new("u1", "scans", ScanOutcome::Error, 30)
                .with_error_kind("transient"),
        );

        let stats = agg.stats(7);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.error, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.confidence.count, 2);
        assert!((stats.confidence.mean().unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(stats.latency_ms.count, 3);
        assert_eq!(stats.latency_ms.min, Some(30.0));
        assert_eq!(stats.latency_ms.max, Some(120.0));
        assert_eq!(stats.per_resource.get("scans"), Some(&3));
    }

    #[test]
    fn histogram_bands_are_ten_percent_wide() {
        let agg = aggregator();
        agg.fold_now(&success("u1", 0.04, 10));
        agg.fold_now(&success("u1", 0.95, 10));
        agg.fold_now(&success("u1", 0.999, 10));
        // 1.0 lands in the top band, not out of range.
        agg.fold_now(&success("u1", 1.0, 10));

        let stats = agg.stats(7);
        assert_eq!(stats.confidence_histogram[0], 1);
        assert_eq!(stats.confidence_histogram[9], 3);
        assert_eq!(stats.confidence_histogram.iter().sum::<u64>(), 4);
    }

    #[test]
    fn leaderboard_ranks_by_successful_scans() {
        let agg = aggregator();
        for _ in 0..3 {
            agg.fold_now(&success("alice", 0.9, 50));
        }
        agg.fold_now(&success("bob", 0.9, 50));
        // Errors do not score.
        agg.fold_now(&OutcomeRecord::new("bob", "scans", ScanOutcome::Error, 50));

        let board = agg.leaderboard(7, 10);
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, "alice");
        assert_eq!(board[0].scans, 3);
        assert_eq!(board[1].user_id, "bob");
        assert_eq!(board[1].scans, 1);

        assert_eq!(agg.leaderboard(7, 1).len(), 1);
    }

    #[test]
    fn error_breakdown_counts_by_kind() {
        let agg = aggregator();
        for _ in 0..2 {
            agg.fold_now(
                &OutcomeRecord::new("u1", "scans", ScanOutcome::Error, 10)
                    .with_error_kind("transient"),
            );
        }
        agg.fold_now(
            &OutcomeRecord::new("u1", "scans", ScanOutcome::Error, 10)
                .with_error_kind("circuit_open"),
        );

        let breakdown = agg.error_breakdown(7);
        assert_eq!(breakdown.get("transient"), Some(&2));
        assert_eq!(breakdown.get("circuit_open"), Some(&1));
    }

    #[test]
    fn window_excludes_old_buckets() {
        let agg = aggregator();
        let mut old = success("u1", 0.9, 50);
        old.timestamp = Utc::now() - ChronoDuration::days(10);
        agg.fold_now(&old);
        agg.fold_now(&success("u2", 0.9, 50));

        assert_eq!(agg.stats(7).total, 1);
        assert_eq!(agg.stats(30).total, 2);
    }

    #[tokio::test]
    async fn flush_loop_persists_and_folds() {
        let store = Arc::new(MemoryOutcomeStore::new());
        let config = AnalyticsConfig {
            flush_interval_ms: 10,
            flush_batch_size: 100,
            buffer_capacity: 64,
        };
        let agg = Arc::new(AnalyticsAggregator::new(store.clone(), config));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(agg.clone().run_flush_loop(shutdown_rx));

        for i in 0..5 {
            agg.record(success(&format!("u{i}"), 0.9, 40));
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(store.len(), 5);
        assert_eq!(agg.stats(1).total, 5);
        assert_eq!(agg.dropped_count(), 0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn rehydrate_rebuilds_buckets_from_store() {
        let store = Arc::new(MemoryOutcomeStore::new());
        store
            .append_batch(&[success("u1", 0.9, 40), success("u2", 0.8, 60)])
            .await
            .unwrap();

        let agg = AnalyticsAggregator::new(store, AnalyticsConfig::default());
        assert_eq!(agg.stats(7).total, 0);

        let loaded = agg.rehydrate(7).await.unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(agg.stats(7).total, 2);
    }
}
