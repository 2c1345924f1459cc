//! # Health Monitor
//!
//! Registry of per-dependency breakers plus the call wrapper every remote
//! operation goes through. Publishes status transitions on a watch channel so
//! the offline-queue replay worker can wake the moment a dependency recovers,
//! and runs the background probe loop that tests `Unavailable` dependencies
//! on their cooldown schedule.

use crate::config::HealthConfig;
use crate::error::{CoreError, ErrorKind, Result};
use crate::resilience::{DependencyBreaker, DependencyHealth, DependencyStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A lightweight health check for one dependency, issued by the probe loop.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// A status transition, published to watchers in arrival order.
///
/// `seq` distinguishes consecutive transitions of the same dependency; the
/// watch channel only retains the latest value, which is sufficient for
/// wake-on-recovery consumers that re-check actual state on wake.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthTransition {
    pub seq: u64,
    pub dependency: String,
    pub status: DependencyStatus,
}

/// Per-dependency availability tracking and circuit breaking.
pub struct HealthMonitor {
    config: HealthConfig,
    breakers: DashMap<String, Arc<DependencyBreaker>>,
    probes: DashMap<String, Arc<dyn HealthProbe>>,
    transition_tx: watch::Sender<Option<HealthTransition>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("dependencies", &self.breakers.len())
            .field("probes", &self.probes.len())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let (transition_tx, _) = watch::channel(None);
        Self {
            config,
            breakers: DashMap::new(),
            probes: DashMap::new(),
            transition_tx,
            next_seq: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Get or create the breaker for a named dependency.
    pub fn breaker(&self, dependency: &str) -> Arc<DependencyBreaker> {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(DependencyBreaker::new(
                    dependency.to_string(),
                    self.config.for_dependency(dependency),
                    self.config.cooldown_max(),
                ))
            })
            .clone()
    }

    /// Register the probe used to test this dependency while `Unavailable`.
    pub fn register_probe(&self, dependency: &str, probe: Arc<dyn HealthProbe>) {
        // Ensure the breaker exists so the probe loop sees the dependency.
        self.breaker(dependency);
        self.probes.insert(dependency.to_string(), probe);
    }

    /// Subscribe to status transitions.
    pub fn subscribe(&self) -> watch::Receiver<Option<HealthTransition>> {
        self.transition_tx.subscribe()
    }

    /// Current status of a dependency. Unknown dependencies are `Healthy`
    /// (nothing has failed yet).
    pub fn status(&self, dependency: &str) -> DependencyStatus {
        self.breakers
            .get(dependency)
            .map(|b| b.status())
            .unwrap_or(DependencyStatus::Healthy)
    }

    /// Health snapshots for every tracked dependency, for the status endpoint.
    pub fn snapshot(&self) -> HashMap<String, DependencyHealth> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Execute `operation` under this dependency's breaker.
    ///
    /// Short-circuits with [`CoreError::CircuitOpen`] while the dependency is
    /// `Unavailable` and inside its cooldown window, without invoking the
    /// operation. Otherwise invokes it and records the outcome; errors that
    /// are the caller's fault (validation, quota) do not count against the
    /// dependency's health.
    pub async fn call<F, Fut, T>(&self, dependency: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breaker(dependency);

        if !breaker.should_allow_call() {
            debug!(dependency = dependency, "Circuit open, failing fast");
            return Err(CoreError::CircuitOpen(dependency.to_string()));
        }

        let result = operation().await;

        match &result {
            Ok(_) => {
                if let Some(status) = breaker.record_success() {
                    self.publish(dependency, status);
                }
            }
            Err(e) if counts_as_dependency_failure(e) => {
                if let Some(status) = breaker.record_failure() {
                    self.publish(dependency, status);
                }
            }
            Err(_) => {}
        }

        result
    }

    /// One pass of the probe loop: probe every `Unavailable` dependency whose
    /// cooldown has elapsed. Returns the number of probes issued.
    pub async fn probe_unavailable(&self) -> usize {
        let due: Vec<(String, Arc<DependencyBreaker>, Arc<dyn HealthProbe>)> = self
            .breakers
            .iter()
            .filter(|entry| {
                entry.value().status() == DependencyStatus::Unavailable
                    && entry.value().cooldown_elapsed()
            })
            .filter_map(|entry| {
                self.probes
                    .get(entry.key())
                    .map(|p| (entry.key().clone(), entry.value().clone(), p.clone()))
            })
            .collect();

        let issued = due.len();
        for (name, breaker, probe) in due {
            let outcome = probe.probe().await;
            let success = outcome.is_ok();
            if let Err(e) = &outcome {
                warn!(dependency = %name, error = %e, "Health probe failed");
            } else {
                info!(dependency = %name, "Health probe succeeded");
            }
            if let Some(status) = breaker.record_probe(success) {
                self.publish(&name, status);
            }
        }
        issued
    }

    /// Background probe loop. Ticks every second and probes whatever is due
    /// per its (doubling) cooldown schedule; exits on shutdown.
    pub async fn run_probe_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Health probe loop started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.probe_unavailable().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health probe loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn publish(&self, dependency: &str, status: DependencyStatus) {
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let transition = HealthTransition {
            seq,
            dependency: dependency.to_string(),
            status,
        };
        info!(
            dependency = dependency,
            status = ?status,
            "Dependency status transition"
        );
        // Send fails only when no receiver exists, which is fine.
        let _ = self.transition_tx.send(Some(transition));
    }
}

/// Whether an error reflects the dependency's health rather than the
/// caller's request.
fn counts_as_dependency_failure(error: &CoreError) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Transient | ErrorKind::Database | ErrorKind::Cache | ErrorKind::Internal
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FlakyProbe {
        healthy: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        async fn probe(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(CoreError::Transient("probe refused".into()))
            }
        }
    }

    fn zero_cooldown_config() -> HealthConfig {
        HealthConfig {
            cooldown_seconds: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn call_records_outcomes_and_short_circuits() {
        let monitor = HealthMonitor::new(zero_cooldown_config());

        for _ in 0..6 {
            let _ = monitor
                .call("datastore", || async {
                    Err::<(), _>(CoreError::Transient("connection reset".into()))
                })
                .await;
        }
        assert_eq!(monitor.status("datastore"), DependencyStatus::Unavailable);
    }

    #[tokio::test]
    async fn caller_fault_errors_do_not_degrade() {
        let monitor = HealthMonitor::new(HealthConfig::default());

        for _ in 0..10 {
            let _ = monitor
                .call("datastore", || async {
                    Err::<(), _>(CoreError::Validation("bad payload".into()))
                })
                .await;
        }
        assert_eq!(monitor.status("datastore"), DependencyStatus::Healthy);
    }

    #[tokio::test]
    async fn short_circuit_does_not_invoke_operation() {
        let mut config = HealthConfig::default();
        config.cooldown_seconds = 3_600;
        let monitor = HealthMonitor::new(config);

        for _ in 0..6 {
            let _ = monitor
                .call("datastore", || async {
                    Err::<(), _>(CoreError::Transient("down".into()))
                })
                .await;
        }

        let invoked = AtomicBool::new(false);
        let result = monitor
            .call("datastore", || async {
                invoked.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CoreError::CircuitOpen(_))));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn probe_recovery_publishes_healthy_transition() {
        let monitor = Arc::new(HealthMonitor::new(zero_cooldown_config()));
        let probe = Arc::new(FlakyProbe {
            healthy: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        });
        monitor.register_probe("datastore", probe.clone());
        let mut transitions = monitor.subscribe();

        for _ in 0..6 {
            let _ = monitor
                .call("datastore", || async {
                    Err::<(), _>(CoreError::Transient("down".into()))
                })
                .await;
        }
        assert_eq!(monitor.status("datastore"), DependencyStatus::Unavailable);

        // Failed probe leaves it unavailable
        monitor.probe_unavailable().await;
        assert_eq!(monitor.status("datastore"), DependencyStatus::Unavailable);

        // Two successful probes restore Healthy (success threshold 2)
        probe.healthy.store(true, Ordering::SeqCst);
        monitor.probe_unavailable().await;
        assert_eq!(monitor.status("datastore"), DependencyStatus::Unavailable);
        monitor.probe_unavailable().await;
        assert_eq!(monitor.status("datastore"), DependencyStatus::Healthy);

        transitions.changed().await.unwrap();
        let last = transitions.borrow().clone().unwrap();
        assert_eq!(last.dependency, "datastore");
        assert_eq!(last.status, DependencyStatus::Healthy);
        assert!(probe.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn unknown_dependency_reports_healthy() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        assert_eq!(monitor.status("never-called"), DependencyStatus::Healthy);
        assert!(monitor.snapshot().is_empty());
    }
}
