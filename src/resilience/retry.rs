//! # Retry Executor
//!
//! Bounded exponential backoff with multiplicative full jitter around
//! monitor-wrapped calls. The policy is immutable per call-site and passed in
//! by the caller; replacing ad hoc hardcoded delay lists with policy objects
//! keeps backoff behavior reviewable in one place.
//!
//! Delay before attempt k (k >= 2) is
//! `min(base_delay * 2^(k-2), max_delay) * (1 ± jitter_ratio)`. The jitter is
//! a multiplicative factor, not an additive offset, so synchronized callers
//! spread proportionally to their delay and cannot herd.
//!
//! The whole execution runs under a caller-supplied deadline: an attempt is
//! not started when the pre-attempt delay would cross the deadline, and each
//! attempt itself is cut off at the deadline.

use crate::config::RetryPolicy;
use crate::error::{CoreError, Result};
use crate::resilience::HealthMonitor;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Executes operations with retry, backoff, and circuit-breaker wrapping.
#[derive(Clone)]
pub struct RetryExecutor {
    monitor: Arc<HealthMonitor>,
}

impl RetryExecutor {
    pub fn new(monitor: Arc<HealthMonitor>) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Attempt `operation` against `dependency` up to `policy.max_attempts`
    /// times before `deadline`.
    ///
    /// Every attempt goes through [`HealthMonitor::call`], so persistent
    /// failure opens the dependency's circuit independently of other
    /// dependencies' retry budgets. Non-retryable errors (validation,
    /// quota-exceeded, ...) return immediately; only transient and
    /// circuit-open errors are retried. Returns the last error when all
    /// attempts fail.
    pub async fn execute<F, Fut, T>(
        &self,
        dependency: &str,
        policy: RetryPolicy,
        deadline: Instant,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=policy.max_attempts {
            if attempt >= 2 {
                let delay = jittered_delay(&policy, attempt);
                let now = Instant::now();
                if now + delay >= deadline {
                    // Starting a doomed attempt wastes downstream capacity.
                    warn!(
                        dependency = dependency,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Deadline would elapse before next attempt"
                    );
                    return Err(CoreError::DeadlineExceeded(format!(
                        "no time left for attempt {attempt} against {dependency}"
                    )));
                }
                debug!(
                    dependency = dependency,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            let attempt_result = tokio::time::timeout_at(
                deadline,
                self.monitor.call(dependency, &mut operation),
            )
            .await;

            match attempt_result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    debug!(
                        dependency = dependency,
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        error = %error,
                        "Retryable failure"
                    );
                    last_error = Some(error);
                }
                Err(_elapsed) => {
                    return Err(CoreError::DeadlineExceeded(format!(
                        "attempt {attempt} against {dependency} hit the deadline"
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CoreError::Internal("retry loop exited without an error".to_string())
        }))
    }
}

/// Backoff delay before attempt `k` (k >= 2), jittered multiplicatively.
fn jittered_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(2).min(31);
    let base = policy
        .base_delay()
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(policy.max_delay());

    if policy.jitter_ratio <= 0.0 {
        return base;
    }

    let factor = rand::thread_rng()
        .gen_range(1.0 - policy.jitter_ratio..=1.0 + policy.jitter_ratio);
    base.mul_f64(factor)
}
