//! # Resilience Primitives
//!
//! Fault isolation for the scan service's downstream dependencies (datastore,
//! cache, identity provider, classifier). Three cooperating pieces:
//!
//! - [`DependencyBreaker`] - per-dependency tri-state health with hysteresis
//! - [`HealthMonitor`] - breaker registry, call wrapper, and background probes
//! - [`RetryExecutor`] - bounded, jittered, deadline-aware retry around
//!   monitor-wrapped calls
//!
//! Request paths never block on probes; they read atomic state and either
//! proceed or fail fast with [`crate::error::CoreError::CircuitOpen`].

mod circuit_breaker;
mod monitor;
mod retry;

pub use circuit_breaker::{DependencyBreaker, DependencyHealth, DependencyStatus};
pub use monitor::{HealthMonitor, HealthProbe, HealthTransition};
pub use retry::RetryExecutor;
