//! # Dependency Circuit Breaker
//!
//! Tri-state health tracking for one downstream dependency. Unlike the classic
//! Closed/Open/HalfOpen breaker, status degrades in two steps so the UI layer
//! can show "degraded" before the dependency is bypassed entirely:
//!
//! - `Healthy` → `Degraded` after N1 consecutive failures (default 3)
//! - `Degraded` → `Unavailable` after N2 consecutive failures (default 6)
//! - recovery to `Healthy` only after the configured number of consecutive
//!   successes (default 2), so a single success racing with failures cannot
//!   flap the status back
//!
//! While `Unavailable`, calls are rejected until the cooldown elapses; the
//! cooldown doubles on each failed trial up to a cap. All state is atomic;
//! the hot path takes no locks.

use crate::config::ResolvedHealthThresholds;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Availability status of one downstream dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    /// Normal operation - all calls are allowed through.
    Healthy = 0,
    /// Consecutive failures observed; calls still allowed, callers may prefer
    /// cached or fallback paths.
    Degraded = 1,
    /// Dependency is bypassed; calls fail fast until the cooldown elapses.
    Unavailable = 2,
}

impl DependencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyStatus::Healthy => "healthy",
            DependencyStatus::Degraded => "degraded",
            DependencyStatus::Unavailable => "unavailable",
        }
    }
}

impl From<u8> for DependencyStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => DependencyStatus::Healthy,
            1 => DependencyStatus::Degraded,
            // Default to the safest state
            _ => DependencyStatus::Unavailable,
        }
    }
}

/// Point-in-time health snapshot, serialized by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: DependencyStatus,
    pub consecutive_failures: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

#[inline]
fn epoch_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

fn epoch_nanos_to_datetime(nanos: u64) -> Option<DateTime<Utc>> {
    if nanos == 0 {
        return None;
    }
    Some(Utc.timestamp_nanos(nanos as i64))
}

/// Per-dependency breaker with atomic state management.
#[derive(Debug)]
pub struct DependencyBreaker {
    name: String,
    thresholds: ResolvedHealthThresholds,
    cooldown_max: Duration,

    /// Current status (atomic for lock-free reads on the request path).
    status: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    /// Epoch nanos when the breaker last became Unavailable (0 = not open).
    opened_at_epoch_nanos: AtomicU64,
    /// Epoch nanos of the last probe attempt (0 = never probed).
    last_probe_at_epoch_nanos: AtomicU64,
    /// Current cooldown, doubled on each failed trial while Unavailable.
    cooldown_nanos: AtomicU64,
}

impl DependencyBreaker {
    pub fn new(name: String, thresholds: ResolvedHealthThresholds, cooldown_max: Duration) -> Self {
        info!(
            dependency = %name,
            degraded_threshold = thresholds.degraded_threshold,
            unavailable_threshold = thresholds.unavailable_threshold,
            success_threshold = thresholds.success_threshold,
            cooldown_seconds = thresholds.cooldown.as_secs(),
            "Dependency breaker initialized"
        );

        Self {
            name,
            cooldown_max,
            status: AtomicU8::new(DependencyStatus::Healthy as u8),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            opened_at_epoch_nanos: AtomicU64::new(0),
            last_probe_at_epoch_nanos: AtomicU64::new(0),
            cooldown_nanos: AtomicU64::new(thresholds.cooldown.as_nanos() as u64),
            thresholds,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> DependencyStatus {
        DependencyStatus::from(self.status.load(Ordering::Acquire))
    }

    /// Whether a call should be admitted right now.
    ///
    /// `Unavailable` admits one trial call once the cooldown has elapsed since
    /// `opened_at`; the probe task uses the same gate.
    pub fn should_allow_call(&self) -> bool {
        match self.status() {
            DependencyStatus::Healthy | DependencyStatus::Degraded => true,
            DependencyStatus::Unavailable => self.cooldown_elapsed(),
        }
    }

    /// Whether the cooldown window since `opened_at` has passed.
    pub fn cooldown_elapsed(&self) -> bool {
        let opened = self.opened_at_epoch_nanos.load(Ordering::Acquire);
        if opened == 0 {
            warn!(dependency = %self.name, "Breaker unavailable but no opened_at recorded");
            return true;
        }
        let elapsed = epoch_nanos_now().saturating_sub(opened);
        elapsed >= self.cooldown_nanos.load(Ordering::Acquire)
    }

    /// Record a successful call or probe. Returns the new status when this
    /// success caused a transition.
    pub fn record_success(&self) -> Option<DependencyStatus> {
        // Failures decay toward zero rather than resetting, so a lone success
        // inside a failure burst does not erase the burst.
        let _ = self
            .consecutive_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
        let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;

        let status = self.status();
        if status != DependencyStatus::Healthy
            && successes >= self.thresholds.success_threshold
        {
            self.transition_to_healthy();
            return Some(DependencyStatus::Healthy);
        }

        debug!(
            dependency = %self.name,
            consecutive_successes = successes,
            status = ?status,
            "Dependency call succeeded"
        );
        None
    }

    /// Record a failed call or probe. Returns the new status when this
    /// failure caused a transition.
    pub fn record_failure(&self) -> Option<DependencyStatus> {
        self.consecutive_successes.store(0, Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match self.status() {
            DependencyStatus::Healthy => {
                if failures >= self.thresholds.unavailable_threshold {
                    self.transition_to_unavailable();
                    Some(DependencyStatus::Unavailable)
                } else if failures >= self.thresholds.degraded_threshold {
                    self.transition_to_degraded(failures);
                    Some(DependencyStatus::Degraded)
                } else {
                    None
                }
            }
            DependencyStatus::Degraded => {
                if failures >= self.thresholds.unavailable_threshold {
                    self.transition_to_unavailable();
                    Some(DependencyStatus::Unavailable)
                } else {
                    None
                }
            }
            DependencyStatus::Unavailable => {
                // A failed trial call re-opens the window with a doubled
                // cooldown, capped at the configured maximum.
                let current = self.cooldown_nanos.load(Ordering::Acquire);
                let max = self.cooldown_max.as_nanos() as u64;
                let doubled = current.saturating_mul(2).min(max);
                self.cooldown_nanos.store(doubled, Ordering::Release);
                self.opened_at_epoch_nanos
                    .store(epoch_nanos_now(), Ordering::Release);
                debug!(
                    dependency = %self.name,
                    cooldown_seconds = doubled / 1_000_000_000,
                    "Trial call failed, cooldown doubled"
                );
                None
            }
        }
    }

    /// Record a probe attempt's outcome, updating `last_probe_at`.
    pub fn record_probe(&self, success: bool) -> Option<DependencyStatus> {
        self.last_probe_at_epoch_nanos
            .store(epoch_nanos_now(), Ordering::Release);
        if success {
            self.record_success()
        } else {
            self.record_failure()
        }
    }

    pub fn snapshot(&self) -> DependencyHealth {
        DependencyHealth {
            name: self.name.clone(),
            status: self.status(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            last_probe_at: epoch_nanos_to_datetime(
                self.last_probe_at_epoch_nanos.load(Ordering::Acquire),
            ),
            opened_at: epoch_nanos_to_datetime(
                self.opened_at_epoch_nanos.load(Ordering::Acquire),
            ),
        }
    }

    fn transition_to_healthy(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.consecutive_successes.store(0, Ordering::Release);
        self.opened_at_epoch_nanos.store(0, Ordering::Release);
        self.cooldown_nanos
            .store(self.thresholds.cooldown.as_nanos() as u64, Ordering::Release);
        self.status
            .store(DependencyStatus::Healthy as u8, Ordering::Release);

        info!(dependency = %self.name, "Dependency recovered");
    }

    fn transition_to_degraded(&self, failures: u32) {
        self.status
            .store(DependencyStatus::Degraded as u8, Ordering::Release);

        warn!(
            dependency = %self.name,
            consecutive_failures = failures,
            "Dependency degraded"
        );
    }

    fn transition_to_unavailable(&self) {
        self.opened_at_epoch_nanos
            .store(epoch_nanos_now(), Ordering::Release);
        self.status
            .store(DependencyStatus::Unavailable as u8, Ordering::Release);

        warn!(
            dependency = %self.name,
            cooldown_seconds = self.cooldown_nanos.load(Ordering::Acquire) / 1_000_000_000,
            "Dependency unavailable, failing fast"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;

    fn breaker() -> DependencyBreaker {
        let config = HealthConfig::default();
        DependencyBreaker::new(
            "datastore".to_string(),
            config.for_dependency("datastore"),
            config.cooldown_max(),
        )
    }

    fn fast_breaker(cooldown: Duration) -> DependencyBreaker {
        let mut config = HealthConfig::default();
        config.cooldown_seconds = 0;
        let mut thresholds = config.for_dependency("datastore");
        thresholds.cooldown = cooldown;
        DependencyBreaker::new("datastore".to_string(), thresholds, config.cooldown_max())
    }

    #[test]
    fn degrades_then_opens_on_consecutive_failures() {
        let breaker = breaker();
        assert_eq!(breaker.status(), DependencyStatus::Healthy);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.status(), DependencyStatus::Healthy);

        // Third consecutive failure degrades
        assert_eq!(breaker.record_failure(), Some(DependencyStatus::Degraded));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.status(), DependencyStatus::Degraded);

        // Sixth opens the circuit
        assert_eq!(
            breaker.record_failure(),
            Some(DependencyStatus::Unavailable)
        );
        assert!(!breaker.should_allow_call());
        assert!(breaker.snapshot().opened_at.is_some());
    }

    #[test]
    fn single_success_does_not_restore_healthy() {
        let breaker = fast_breaker(Duration::ZERO);
        for _ in 0..6 {
            breaker.record_failure();
        }
        assert_eq!(breaker.status(), DependencyStatus::Unavailable);

        // Cooldown of zero admits a trial immediately, but one success is
        // below the success threshold of two.
        assert!(breaker.should_allow_call());
        assert_eq!(breaker.record_success(), None);
        assert_eq!(breaker.status(), DependencyStatus::Unavailable);

        // The second consecutive success recovers.
        assert_eq!(breaker.record_success(), Some(DependencyStatus::Healthy));
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn success_decays_failures_instead_of_resetting() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        // 2 failures decayed to 1; two more failures reach the threshold of 3
        breaker.record_failure();
        assert_eq!(breaker.status(), DependencyStatus::Healthy);
        breaker.record_failure();
        assert_eq!(breaker.status(), DependencyStatus::Degraded);
    }

    #[test]
    fn failed_trial_doubles_cooldown() {
        let breaker = fast_breaker(Duration::from_nanos(1));
        for _ in 0..6 {
            breaker.record_failure();
        }
        let before = breaker.cooldown_nanos.load(Ordering::Acquire);
        breaker.record_failure();
        let after = breaker.cooldown_nanos.load(Ordering::Acquire);
        assert_eq!(after, before * 2);
    }

    #[test]
    fn failure_interrupts_success_streak() {
        let breaker = fast_breaker(Duration::ZERO);
        for _ in 0..6 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();
        breaker.record_success();
        // Streak restarted after the failure; still unavailable.
        assert_eq!(breaker.status(), DependencyStatus::Unavailable);
        breaker.record_success();
        assert_eq!(breaker.status(), DependencyStatus::Healthy);
    }
}
