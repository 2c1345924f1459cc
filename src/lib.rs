//! # ScanDeck Core
//!
//! Resilience and usage-governance subsystem for the ScanDeck card-scan
//! service. Wraps the service's flaky dependencies (classifier, backend
//! datastore, cache) behind circuit-breaking health monitoring, bounded
//! retries, and a durable offline queue, and governs per-tier usage
//! budgets with rolling scan analytics on top.
//!
//! ## Core Components
//!
//! - [`resilience`] - Per-dependency circuit breakers, health probes, and
//!   the deadline-aware retry executor
//! - [`cache`] - Dual-backend cache (networked primary, in-process
//!   fallback) with atomic counters
//! - [`queue`] - Durable offline queue with idempotent replay and
//!   dead-lettering
//! - [`governor`] - Tier-based daily usage quotas over cache counters
//! - [`analytics`] - Append-only scan outcomes with rolling aggregates
//! - [`pipeline`] - End-to-end orchestration of scans and collection
//!   writes, including the queue-on-disconnect fallback
//! - [`web`] - Axum HTTP API for operators and host integrations
//! - [`services`] - Capability traits for the external services the
//!   pipeline consumes
//!
//! ## Availability Contract
//!
//! A write that cannot reach its dependency is acknowledged as queued and
//! replayed when the dependency recovers; it is never silently dropped.
//! Usage budgets reject rather than clamp, so a reservation that would
//! exceed the tier limit leaves the counter untouched.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod governor;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod resilience;
pub mod services;
pub mod web;

pub use config::CoreConfig;
pub use error::{CoreError, ErrorKind, Result};
pub use logging::init_structured_logging;
