//! # Replay Worker
//!
//! Single background worker per process that drains the offline queue when
//! the target dependency recovers. Ordering is FIFO per owner; owners drain
//! concurrently under a semaphore so one owner's backlog cannot block the
//! rest, and one bad entry cannot block other owners (head-of-line blocking
//! is bounded to its own owner).
//!
//! Wake sources, in priority order:
//! - any health transition (the watch channel retains only the latest value,
//!   so the worker re-checks live breaker state rather than the payload)
//! - an explicit drain request (the admin drain endpoint)
//! - a housekeeping tick that purges completed entries past their grace
//!   period and doubles as a drain backstop while the dependency is healthy

use super::entry::QueueEntry;
use super::offline_queue::OfflineQueue;
use crate::config::RetryPolicy;
use crate::error::{CoreError, ErrorKind, Result};
use crate::resilience::{DependencyStatus, HealthMonitor, RetryExecutor};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Applies a queued action downstream during replay.
///
/// Implementations must be idempotent per idempotency key; the worker
/// additionally keeps a short-lived seen-set as a second line of defense
/// against duplicate submissions arriving through a parallel path.
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    async fn apply(&self, entry: &QueueEntry) -> Result<()>;
}

/// Handle for requesting an immediate drain from outside the worker.
#[derive(Clone)]
pub struct DrainHandle {
    tx: mpsc::Sender<Option<String>>,
}

impl DrainHandle {
    /// Request a drain of one owner (`Some`) or all owners (`None`).
    /// Non-blocking; a full signal queue means a drain is already scheduled.
    pub fn request(&self, owner_id: Option<String>) {
        let _ = self.tx.try_send(owner_id);
    }
}

/// Background replay worker. Construct once per process and `run` it on a
/// dedicated task.
pub struct ReplayWorker {
    queue: OfflineQueue,
    handler: Arc<dyn ReplayHandler>,
    executor: RetryExecutor,
    /// Dependency the replayed actions target; drains trigger on its recovery.
    dependency: String,
    policy: RetryPolicy,
    concurrency: Arc<Semaphore>,
    seen: moka::future::Cache<String, ()>,
    drain_rx: parking_lot::Mutex<Option<mpsc::Receiver<Option<String>>>>,
    drain_tx: mpsc::Sender<Option<String>>,
}

impl ReplayWorker {
    pub fn new(
        queue: OfflineQueue,
        handler: Arc<dyn ReplayHandler>,
        executor: RetryExecutor,
        dependency: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        let config = queue.config().clone();
        let (drain_tx, drain_rx) = mpsc::channel(8);
        Self {
            handler,
            executor,
            dependency: dependency.into(),
            policy,
            concurrency: Arc::new(Semaphore::new(config.replay_concurrency)),
            seen: moka::future::Cache::builder()
                .max_capacity(100_000)
                .time_to_live(config.seen_set_ttl())
                .build(),
            drain_rx: parking_lot::Mutex::new(Some(drain_rx)),
            drain_tx,
            queue,
        }
    }

    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            tx: self.drain_tx.clone(),
        }
    }

    /// Worker loop; exits on shutdown. Request paths never wait on this task,
    /// they only publish queue entries and drain requests.
    pub async fn run(self: Arc<Self>, monitor: Arc<HealthMonitor>, mut shutdown: watch::Receiver<bool>) {
        let mut transitions = monitor.subscribe();
        let mut drain_rx = self
            .drain_rx
            .lock()
            .take()
            .expect("replay worker started twice");
        let mut housekeeping = tokio::time::interval(std::time::Duration::from_secs(60));
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(dependency = %self.dependency, "Replay worker started");
        // Entries queued before this task started have no transition coming.
        if monitor.status(&self.dependency) == DependencyStatus::Healthy {
            self.drain_all().await;
        }
        loop {
            tokio::select! {
                changed = transitions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    transitions.borrow_and_update();
                    // A later transition of another dependency can overwrite
                    // the recovery in the retained watch value, so the
                    // payload is unreliable; live breaker state is not.
                    if monitor.status(&self.dependency) == DependencyStatus::Healthy {
                        self.drain_all().await;
                    }
                }
                request = drain_rx.recv() => {
                    match request {
                        Some(Some(owner_id)) => {
                            self.clone().drain_owner(owner_id).await;
                        }
                        Some(None) => {
                            self.drain_all().await;
                        }
                        None => break,
                    }
                }
                _ = housekeeping.tick() => {
                    let cutoff = chrono::Utc::now()
                        - chrono::Duration::from_std(self.queue.config().completed_grace())
                            .unwrap_or_else(|_| chrono::Duration::hours(1));
                    match self.queue.store().purge_completed_before(cutoff).await {
                        Ok(purged) if purged > 0 => {
                            debug!(purged = purged, "Purged completed queue entries");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Queue purge failed"),
                    }
                    if monitor.status(&self.dependency) == DependencyStatus::Healthy {
                        self.drain_all().await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Replay worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Drain every owner with pending entries, FIFO within each owner,
    /// concurrently across owners up to the configured bound.
    pub async fn drain_all(self: &Arc<Self>) {
        let owners = match self.queue.store().owners_with_pending().await {
            Ok(owners) => owners,
            Err(e) => {
                error!(error = %e, "Failed to list owners with pending entries");
                return;
            }
        };
        if owners.is_empty() {
            return;
        }

        debug!(owners = owners.len(), "Draining offline queue");
        let mut tasks = JoinSet::new();
        for owner_id in owners {
            let worker = self.clone();
            let permit = self.concurrency.clone().acquire_owned().await;
            let Ok(permit) = permit else { return };
            tasks.spawn(async move {
                let _permit = permit;
                worker.drain_owner(owner_id).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Drain one owner's pending entries in enqueue order. Stops early when
    /// the dependency goes down again, leaving the remainder queued.
    pub async fn drain_owner(self: Arc<Self>, owner_id: String) {
        loop {
            let batch = match self.queue.drain_batch(&owner_id, 50).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(owner_id = %owner_id, error = %e, "Failed to read pending entries");
                    return;
                }
            };
            if batch.is_empty() {
                return;
            }

            for entry in batch {
                match self.replay_entry(&entry).await {
                    ReplayOutcome::Applied | ReplayOutcome::Duplicate => {}
                    ReplayOutcome::DeadLettered => {}
                    ReplayOutcome::Requeued => {
                        // Dependency is down again; preserve FIFO by stopping.
                        debug!(owner_id = %owner_id, "Drain paused, dependency unavailable");
                        return;
                    }
                    ReplayOutcome::StoreError => return,
                }
            }
        }
    }

    async fn replay_entry(&self, entry: &QueueEntry) -> ReplayOutcome {
        let seen_key = format!("{}:{}", entry.owner_id, entry.idempotency_key);
        if self.seen.get(&seen_key).await.is_some() {
            // Already applied downstream through a parallel path.
            warn!(
                entry_id = %entry.id,
                owner_id = %entry.owner_id,
                "Skipping entry with already-applied idempotency key"
            );
            return match self.queue.store().mark_completed(entry.id).await {
                Ok(()) => ReplayOutcome::Duplicate,
                Err(_) => ReplayOutcome::StoreError,
            };
        }

        if let Err(e) = self.queue.store().mark_in_flight(entry.id).await {
            error!(entry_id = %entry.id, error = %e, "Failed to claim entry");
            return ReplayOutcome::StoreError;
        }
        let attempt_count = entry.attempt_count + 1;

        let deadline = Instant::now() + self.queue.config().replay_entry_timeout();
        let handler = self.handler.clone();
        let result = self
            .executor
            .execute(&self.dependency, self.policy, deadline, || {
                handler.apply(entry)
            })
            .await;

        match result {
            Ok(()) => {
                self.seen.insert(seen_key, ()).await;
                match self.queue.store().mark_completed(entry.id).await {
                    Ok(()) => {
                        info!(
                            entry_id = %entry.id,
                            owner_id = %entry.owner_id,
                            attempts = attempt_count,
                            "Queue entry replayed"
                        );
                        ReplayOutcome::Applied
                    }
                    Err(_) => ReplayOutcome::StoreError,
                }
            }
            Err(e) => self.handle_replay_failure(entry, attempt_count, e).await,
        }
    }

    async fn handle_replay_failure(
        &self,
        entry: &QueueEntry,
        attempt_count: i32,
        error: CoreError,
    ) -> ReplayOutcome {
        let dependency_down = matches!(
            error.kind(),
            ErrorKind::CircuitOpen | ErrorKind::DeadlineExceeded
        );
        let exhausted = attempt_count >= self.queue.config().max_replay_attempts as i32;

        if dependency_down && !exhausted {
            // Not the entry's fault; requeue and wait for the next recovery.
            return match self.queue.store().mark_pending(entry.id).await {
                Ok(()) => ReplayOutcome::Requeued,
                Err(_) => ReplayOutcome::StoreError,
            };
        }

        if error.is_retryable() && !exhausted {
            warn!(
                entry_id = %entry.id,
                attempts = attempt_count,
                error = %error,
                "Replay failed, will retry on next drain"
            );
            return match self.queue.store().mark_pending(entry.id).await {
                Ok(()) => ReplayOutcome::Requeued,
                Err(_) => ReplayOutcome::StoreError,
            };
        }

        // Terminal error or replay budget exhausted: dead-letter, never drop.
        error!(
            entry_id = %entry.id,
            owner_id = %entry.owner_id,
            attempts = attempt_count,
            error = %error,
            "Queue entry dead-lettered"
        );
        match self.queue.store().mark_failed(entry.id).await {
            Ok(()) => ReplayOutcome::DeadLettered,
            Err(_) => ReplayOutcome::StoreError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayOutcome {
    Applied,
    Duplicate,
    Requeued,
    DeadLettered,
    StoreError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, QueueConfig};
    use crate::queue::entry::QueueEntryStatus;
    use crate::queue::store::MemoryQueueStore;
    use parking_lot::Mutex;

    struct RecordingHandler {
        applied: Mutex<Vec<String>>,
        fail_keys: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                applied: Mutex::new(Vec::new()),
                fail_keys: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReplayHandler for RecordingHandler {
        async fn apply(&self, entry: &QueueEntry) -> Result<()> {
            if self.fail_keys.lock().contains(&entry.idempotency_key) {
                return Err(CoreError::Validation("poison entry".into()));
            }
            self.applied.lock().push(entry.idempotency_key.clone());
            Ok(())
        }
    }

    fn worker(handler: Arc<RecordingHandler>) -> (Arc<ReplayWorker>, OfflineQueue) {
        worker_on(handler, Arc::new(HealthMonitor::new(HealthConfig::default())))
    }

    fn worker_on(
        handler: Arc<RecordingHandler>,
        monitor: Arc<HealthMonitor>,
    ) -> (Arc<ReplayWorker>, OfflineQueue) {
        let store = Arc::new(MemoryQueueStore::new());
        let queue = OfflineQueue::new(store, QueueConfig::default());
        let executor = RetryExecutor::new(monitor);
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_ratio: 0.0,
        };
        let worker = Arc::new(ReplayWorker::new(
            queue.clone(),
            handler,
            executor,
            "datastore",
            policy,
        ));
        (worker, queue)
    }

    async fn wait_for_drain(queue: &OfflineQueue) -> bool {
        for _ in 0..200 {
            if queue.size().await.unwrap() == 0 {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn drains_pending_backlog_on_startup() {
        let handler = RecordingHandler::new();
        let monitor = Arc::new(HealthMonitor::new(HealthConfig::default()));
        let (worker, queue) = worker_on(handler.clone(), monitor.clone());

        // Queued before the worker task exists; no transition will arrive.
        queue.enqueue("u1", serde_json::json!({}), "k1").await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = tokio::spawn(worker.clone().run(monitor, shutdown_rx));

        assert!(wait_for_drain(&queue).await);
        assert_eq!(handler.applied.lock().clone(), vec!["k1"]);

        let _ = shutdown_tx.send(true);
        let _ = run.await;
    }

    #[tokio::test]
    async fn recovery_drain_survives_later_transitions() {
        let handler = RecordingHandler::new();
        let monitor = Arc::new(HealthMonitor::new(HealthConfig {
            cooldown_seconds: 0,
            ..Default::default()
        }));
        let (worker, queue) = worker_on(handler.clone(), monitor.clone());

        for _ in 0..6 {
            let _ = monitor
                .call("datastore", || async {
                    Err::<(), _>(CoreError::Transient("down".into()))
                })
                .await;
        }
        assert_eq!(monitor.status("datastore"), DependencyStatus::Unavailable);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = tokio::spawn(worker.clone().run(monitor.clone(), shutdown_rx));

        queue.enqueue("u1", serde_json::json!({}), "k1").await.unwrap();

        // Recovery publishes Healthy, then an unrelated breaker's transition
        // overwrites the retained watch value before the worker polls. The
        // drain must still happen.
        for _ in 0..2 {
            monitor.call("datastore", || async { Ok(()) }).await.unwrap();
        }
        assert_eq!(monitor.status("datastore"), DependencyStatus::Healthy);
        for _ in 0..3 {
            let _ = monitor
                .call("classifier", || async {
                    Err::<(), _>(CoreError::Transient("slow model".into()))
                })
                .await;
        }

        assert!(wait_for_drain(&queue).await);
        assert_eq!(handler.applied.lock().clone(), vec!["k1"]);

        let _ = shutdown_tx.send(true);
        let _ = run.await;
    }

    #[tokio::test]
    async fn drains_in_enqueue_order() {
        let handler = RecordingHandler::new();
        let (worker, queue) = worker(handler.clone());

        for i in 0..5 {
            queue
                .enqueue("u1", serde_json::json!({ "seq": i }), &format!("k{i}"))
                .await
                .unwrap();
        }

        worker.drain_all().await;

        let applied = handler.applied.lock().clone();
        assert_eq!(applied, vec!["k0", "k1", "k2", "k3", "k4"]);
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replay_skips_already_applied_keys() {
        let handler = RecordingHandler::new();
        let (worker, queue) = worker(handler.clone());

        queue.enqueue("u1", serde_json::json!({}), "k1").await.unwrap();
        worker.drain_all().await;
        assert_eq!(handler.applied.lock().len(), 1);

        // The same action arrives again through a parallel path after the
        // completed entry was purged.
        worker
            .queue
            .store()
            .purge_completed_before(chrono::Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        queue.enqueue("u1", serde_json::json!({}), "k1").await.unwrap();
        worker.drain_all().await;

        // Seen-set rejects the duplicate; downstream saw the key once.
        assert_eq!(handler.applied.lock().len(), 1);
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn terminal_failure_dead_letters_without_blocking_others() {
        let handler = RecordingHandler::new();
        handler.fail_keys.lock().push("poison".to_string());
        let (worker, queue) = worker(handler.clone());

        queue.enqueue("u1", serde_json::json!({}), "poison").await.unwrap();
        queue.enqueue("u1", serde_json::json!({}), "good").await.unwrap();

        worker.drain_all().await;

        assert_eq!(handler.applied.lock().clone(), vec!["good"]);
        let dead = queue.dead_letters("u1", 10, 0).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].idempotency_key, "poison");
        assert_eq!(dead[0].status, QueueEntryStatus::Failed);
    }

    #[tokio::test]
    async fn drain_handle_triggers_single_owner() {
        let handler = RecordingHandler::new();
        let (worker, queue) = worker(handler.clone());

        queue.enqueue("u1", serde_json::json!({}), "k1").await.unwrap();
        queue.enqueue("u2", serde_json::json!({}), "k1").await.unwrap();

        worker.clone().drain_owner("u1".to_string()).await;

        assert_eq!(handler.applied.lock().len(), 1);
        assert_eq!(queue.size().await.unwrap(), 1);
    }
}
