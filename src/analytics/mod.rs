//! # Scan Outcome Analytics
//!
//! Append-only outcome records with rolling per-UTC-day aggregates.
//! Recording never blocks a request path; queries answer from the
//! aggregate buckets in time proportional to the window length.

pub mod aggregator;
pub mod record;
pub mod store;

pub use aggregator::{
    AnalyticsAggregator, LeaderboardEntry, NumericStats, RollingStats, HISTOGRAM_BANDS,
};
pub use record::{OutcomeRecord, ScanOutcome};
pub use store::{MemoryOutcomeStore, OutcomeStore, PgOutcomeStore};
