//! Cache provider with transparent primary/fallback routing.
//!
//! Callers never pick a backend. Every operation is attempted against the
//! primary (networked) backend through the shared [`HealthMonitor`], so
//! repeated failures open the `cache` circuit; while the circuit is open, or
//! when any primary operation fails, the same operation transparently runs
//! against the bounded in-process fallback instead. Callers that need to know
//! about the consistency relaxation (the usage governor) ask [`CacheProvider::backend`].

use super::errors::CacheResult;
use super::providers::{MemoryCacheService, RedisCacheService};
use super::traits::{CacheService, IncrOutcome};
use crate::config::CacheConfig;
use crate::error::CoreError;
use crate::resilience::{DependencyStatus, HealthMonitor, HealthProbe};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Dependency name the cache layer registers with the health monitor.
pub const CACHE_DEPENDENCY: &str = "cache";

/// Which logical backend is currently serving cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// The networked store; shared across process instances.
    Primary,
    /// The in-process store; entries are not shared across instances.
    Fallback,
}

/// Dual-backend cache with TTL semantics and circuit-breaker routing.
#[derive(Clone)]
pub struct CacheProvider {
    primary: Option<Arc<dyn CacheService>>,
    fallback: MemoryCacheService,
    monitor: Arc<HealthMonitor>,
    default_ttl: Duration,
}

impl std::fmt::Debug for CacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("primary", &self.primary.as_ref().map(|p| p.provider_name()))
            .field("backend", &self.backend())
            .finish()
    }
}

/// Health probe that PINGs the primary backend.
struct PrimaryCacheProbe {
    primary: RedisCacheService,
}

#[async_trait::async_trait]
impl HealthProbe for PrimaryCacheProbe {
    async fn probe(&self) -> crate::error::Result<()> {
        self.primary
            .health_check()
            .await
            .map(|_| ())
            .map_err(CoreError::from)
    }
}

impl CacheProvider {
    /// Create a cache provider from configuration with graceful degradation.
    ///
    /// If the primary backend is configured but unreachable, logs a warning
    /// and starts in fallback-only mode; the process never fails to start
    /// over cache connectivity.
    pub async fn from_config_graceful(config: &CacheConfig, monitor: Arc<HealthMonitor>) -> Self {
        let fallback = MemoryCacheService::from_config(&config.memory, config.default_ttl());

        let primary = match config.backend.as_str() {
            "redis" => match &config.redis {
                Some(redis_config) => match RedisCacheService::from_config(redis_config).await {
                    Ok(service) => {
                        info!(backend = "redis", "Primary cache backend connected");
                        monitor.register_probe(
                            CACHE_DEPENDENCY,
                            Arc::new(PrimaryCacheProbe {
                                primary: service.clone(),
                            }),
                        );
                        Some(Arc::new(service) as Arc<dyn CacheService>)
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            "Primary cache unreachable, starting in fallback mode"
                        );
                        None
                    }
                },
                None => {
                    warn!("Cache backend 'redis' configured without [cache.redis], using fallback");
                    None
                }
            },
            "memory" | "in-memory" => {
                info!("Cache configured for in-process backend only");
                None
            }
            other => {
                warn!(backend = other, "Unknown cache backend, using fallback");
                None
            }
        };

        Self {
            primary,
            fallback,
            monitor,
            default_ttl: config.default_ttl(),
        }
    }

    /// Fallback-only provider (single-process deployments and tests).
    pub fn memory_only(config: &CacheConfig, monitor: Arc<HealthMonitor>) -> Self {
        Self {
            primary: None,
            fallback: MemoryCacheService::from_config(&config.memory, config.default_ttl()),
            monitor,
            default_ttl: config.default_ttl(),
        }
    }

    /// Provider over an already-constructed primary backend. Embedders with
    /// their own backend wiring (and tests) use this instead of
    /// [`CacheProvider::from_config_graceful`].
    pub fn with_primary(
        primary: Arc<dyn CacheService>,
        config: &CacheConfig,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            primary: Some(primary),
            fallback: MemoryCacheService::from_config(&config.memory, config.default_ttl()),
            monitor,
            default_ttl: config.default_ttl(),
        }
    }

    /// The backend currently serving operations.
    ///
    /// `Fallback` means entries are process-local and atomic operations are
    /// not atomic across instances; the usage governor widens its safety
    /// margin accordingly.
    pub fn backend(&self) -> CacheBackendKind {
        match &self.primary {
            Some(_) if self.monitor.status(CACHE_DEPENDENCY) != DependencyStatus::Unavailable => {
                CacheBackendKind::Primary
            }
            _ => CacheBackendKind::Fallback,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        if let Some(primary) = &self.primary {
            match self
                .monitor
                .call(CACHE_DEPENDENCY, || async {
                    primary.get(key).await.map_err(CoreError::from)
                })
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) => self.note_fallback("get", &e),
            }
        }
        self.fallback.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        if let Some(primary) = &self.primary {
            match self
                .monitor
                .call(CACHE_DEPENDENCY, || async {
                    primary.set(key, value, ttl).await.map_err(CoreError::from)
                })
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => self.note_fallback("set", &e),
            }
        }
        self.fallback.set(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        if let Some(primary) = &self.primary {
            match self
                .monitor
                .call(CACHE_DEPENDENCY, || async {
                    primary.delete(key).await.map_err(CoreError::from)
                })
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => self.note_fallback("delete", &e),
            }
        }
        self.fallback.delete(key).await
    }

    pub async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        if let Some(primary) = &self.primary {
            match self
                .monitor
                .call(CACHE_DEPENDENCY, || async {
                    primary.clear_prefix(prefix).await.map_err(CoreError::from)
                })
                .await
            {
                Ok(removed) => return Ok(removed),
                Err(e) => self.note_fallback("clear_prefix", &e),
            }
        }
        self.fallback.clear_prefix(prefix).await
    }

    /// Atomic increment-with-limit; see [`CacheService::incr_with_limit`].
    ///
    /// On the primary backend this is atomic across all process instances;
    /// on the fallback it is atomic within this process only.
    pub async fn incr_with_limit(
        &self,
        key: &str,
        amount: i64,
        limit: i64,
        ttl: Duration,
    ) -> CacheResult<IncrOutcome> {
        if let Some(primary) = &self.primary {
            match self
                .monitor
                .call(CACHE_DEPENDENCY, || async {
                    primary
                        .incr_with_limit(key, amount, limit, ttl)
                        .await
                        .map_err(CoreError::from)
                })
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => self.note_fallback("incr_with_limit", &e),
            }
        }
        self.fallback.incr_with_limit(key, amount, limit, ttl).await
    }

    pub async fn decr_floor(&self, key: &str, amount: i64) -> CacheResult<i64> {
        if let Some(primary) = &self.primary {
            match self
                .monitor
                .call(CACHE_DEPENDENCY, || async {
                    primary.decr_floor(key, amount).await.map_err(CoreError::from)
                })
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) => self.note_fallback("decr_floor", &e),
            }
        }
        self.fallback.decr_floor(key, amount).await
    }

    fn note_fallback(&self, operation: &str, error: &CoreError) {
        warn!(
            operation = operation,
            error = %error,
            "Primary cache operation failed, serving from fallback"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::errors::CacheError;
    use crate::config::HealthConfig;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn provider() -> CacheProvider {
        let monitor = Arc::new(HealthMonitor::new(HealthConfig::default()));
        CacheProvider::memory_only(&CacheConfig::default(), monitor)
    }

    /// A primary backend whose availability the test controls.
    struct TogglePrimary {
        down: AtomicBool,
        inner: MemoryCacheService,
    }

    impl TogglePrimary {
        fn new(down: bool) -> Arc<Self> {
            Arc::new(Self {
                down: AtomicBool::new(down),
                inner: MemoryCacheService::new(1_000, Duration::from_secs(60)),
            })
        }

        fn check(&self) -> CacheResult<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(CacheError::ConnectionError("primary refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl CacheService for TogglePrimary {
        async fn get(&self, key: &str) -> CacheResult<Option<String>> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> CacheResult<()> {
            self.check()?;
            self.inner.delete(key).await
        }

        async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
            self.check()?;
            self.inner.clear_prefix(prefix).await
        }

        async fn incr_with_limit(
            &self,
            key: &str,
            amount: i64,
            limit: i64,
            ttl: Duration,
        ) -> CacheResult<IncrOutcome> {
            self.check()?;
            self.inner.incr_with_limit(key, amount, limit, ttl).await
        }

        async fn decr_floor(&self, key: &str, amount: i64) -> CacheResult<i64> {
            self.check()?;
            self.inner.decr_floor(key, amount).await
        }

        async fn health_check(&self) -> CacheResult<bool> {
            self.check()?;
            Ok(true)
        }

        fn provider_name(&self) -> &'static str {
            "toggle"
        }

        fn is_distributed(&self) -> bool {
            true
        }
    }

    fn provider_with_primary(primary: Arc<TogglePrimary>) -> CacheProvider {
        let monitor = Arc::new(HealthMonitor::new(HealthConfig {
            cooldown_seconds: 0,
            ..Default::default()
        }));
        CacheProvider::with_primary(primary, &CacheConfig::default(), monitor)
    }

    #[tokio::test]
    async fn failing_primary_falls_back_transparently() {
        let primary = TogglePrimary::new(true);
        let provider = provider_with_primary(primary.clone());
        let ttl = Duration::from_secs(60);

        assert_eq!(provider.backend(), CacheBackendKind::Primary);

        // Operations succeed throughout, served by the fallback.
        provider.set("cache:user:1", "ash", ttl).await.unwrap();
        assert_eq!(
            provider.get("cache:user:1").await.unwrap(),
            Some("ash".to_string())
        );

        // Repeated failures open the cache circuit.
        for _ in 0..6 {
            provider.get("cache:user:1").await.unwrap();
        }
        assert_eq!(provider.backend(), CacheBackendKind::Fallback);

        // Nothing reached the primary's store.
        assert_eq!(primary.inner.get("cache:user:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn recovered_primary_serves_again() {
        let primary = TogglePrimary::new(true);
        let provider = provider_with_primary(primary.clone());
        let ttl = Duration::from_secs(60);

        for _ in 0..6 {
            provider.get("cache:user:2").await.unwrap();
        }
        assert_eq!(provider.backend(), CacheBackendKind::Fallback);

        // Zero cooldown admits trial calls; two successes close the circuit.
        primary.down.store(false, Ordering::SeqCst);
        provider.set("cache:user:2", "misty", ttl).await.unwrap();
        assert_eq!(
            provider.get("cache:user:2").await.unwrap(),
            Some("misty".to_string())
        );
        assert_eq!(provider.backend(), CacheBackendKind::Primary);
        assert_eq!(
            primary.inner.get("cache:user:2").await.unwrap(),
            Some("misty".to_string())
        );
    }

    #[tokio::test]
    async fn memory_only_reports_fallback_backend() {
        let provider = provider();
        assert_eq!(provider.backend(), CacheBackendKind::Fallback);
    }

    #[tokio::test]
    async fn operations_succeed_without_primary() {
        let provider = provider();
        let ttl = Duration::from_secs(60);

        provider.set("cache:user:1", "ash", ttl).await.unwrap();
        assert_eq!(
            provider.get("cache:user:1").await.unwrap(),
            Some("ash".to_string())
        );

        let outcome = provider
            .incr_with_limit("usage:1:scan:d", 1, 10, ttl)
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.value, 1);

        provider.delete("cache:user:1").await.unwrap();
        assert_eq!(provider.get("cache:user:1").await.unwrap(), None);
    }
}
