//! In-process fallback cache backend.
//!
//! Serves when the primary backend is unreachable, so callers keep working
//! disconnected. Entries live only in this process: cross-instance
//! consistency is explicitly relaxed in fallback mode, and consumers that
//! care (the usage governor) check the provider's reported backend and widen
//! their safety margins.
//!
//! Key/value entries live in a bounded `moka` cache; every entry carries the
//! TTL its writer asked for, applied through an [`moka::Expiry`] policy.
//! Counters live in a `DashMap` because increment-with-limit needs an atomic
//! read-check-write, which the map's entry API provides per key; counter
//! entries carry their own expiry and are dropped lazily.

use crate::cache::errors::CacheResult;
use crate::cache::traits::{CacheService, IncrOutcome};
use crate::config::MemoryCacheConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CounterCell {
    value: i64,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    ttl: Duration,
}

/// Expires each KV entry after the TTL its writer requested, so fallback
/// entries age out on the same schedule the primary would have enforced.
struct PerEntryTtl;

impl moka::Expiry<String, KvEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &KvEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &KvEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // Overwrites restart the clock with the new write's TTL.
        Some(entry.ttl)
    }
}

/// Bounded in-process cache with TTL semantics matching the primary backend.
#[derive(Clone)]
pub struct MemoryCacheService {
    kv: moka::future::Cache<String, KvEntry>,
    counters: std::sync::Arc<DashMap<String, CounterCell>>,
    default_ttl: Duration,
}

impl std::fmt::Debug for MemoryCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheService")
            .field("max_capacity", &self.kv.policy().max_capacity())
            .field("entry_count", &self.kv.entry_count())
            .field("counters", &self.counters.len())
            .finish()
    }
}

impl MemoryCacheService {
    pub fn from_config(config: &MemoryCacheConfig, default_ttl: Duration) -> Self {
        let kv = moka::future::Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(PerEntryTtl)
            .support_invalidation_closures()
            .build();

        debug!(
            max_capacity = config.max_capacity,
            ttl_seconds = default_ttl.as_secs(),
            "In-process cache backend created"
        );

        Self {
            kv,
            counters: std::sync::Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    pub fn new(max_capacity: u64, default_ttl: Duration) -> Self {
        Self::from_config(&MemoryCacheConfig { max_capacity }, default_ttl)
    }
}

#[async_trait]
impl CacheService for MemoryCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let result = self.kv.get(key).await;

        if result.is_some() {
            debug!(key = key, "Cache HIT (memory)");
        } else {
            debug!(key = key, "Cache MISS (memory)");
        }

        Ok(result.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.kv
            .insert(
                key.to_string(),
                KvEntry {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;

        debug!(key = key, ttl_seconds = ttl.as_secs(), "Cache SET (memory)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.kv.invalidate(key).await;
        self.counters.remove(key);
        debug!(key = key, "Cache DEL (memory)");
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let owned = prefix.to_string();
        self.kv
            .invalidate_entries_if(move |k, _| k.starts_with(&owned))
            .map_err(|e| {
                crate::cache::errors::CacheError::BackendError(format!(
                    "invalidation closure rejected: {e}"
                ))
            })?;

        let mut removed: u64 = 0;
        self.counters.retain(|k, _| {
            if k.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });

        debug!(prefix = prefix, counters_removed = removed, "Cache CLEAR_PREFIX (memory)");
        Ok(removed)
    }

    async fn incr_with_limit(
        &self,
        key: &str,
        amount: i64,
        limit: i64,
        ttl: Duration,
    ) -> CacheResult<IncrOutcome> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterCell {
                value: 0,
                expires_at: now + ttl,
            });

        // Expired cells restart the period in place.
        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at = now + ttl;
        }

        if limit >= 0 && entry.value + amount > limit {
            return Ok(IncrOutcome {
                applied: false,
                value: entry.value,
            });
        }

        entry.value += amount;
        Ok(IncrOutcome {
            applied: true,
            value: entry.value,
        })
    }

    async fn decr_floor(&self, key: &str, amount: i64) -> CacheResult<i64> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterCell {
                value: 0,
                expires_at: now + self.default_ttl,
            });

        entry.value = (entry.value - amount).max(0);
        Ok(entry.value)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MemoryCacheService {
        MemoryCacheService::new(1_000, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let cache = service();
        cache.set("cache:card:42", "pikachu", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            cache.get("cache:card:42").await.unwrap(),
            Some("pikachu".to_string())
        );
        cache.delete("cache:card:42").await.unwrap();
        assert_eq!(cache.get("cache:card:42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_honors_per_entry_ttl() {
        let cache = service();
        cache
            .set("cache:session:short", "s", Duration::from_millis(20))
            .await
            .unwrap();
        cache
            .set("cache:session:long", "l", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("cache:session:short").await.unwrap(),
            Some("s".to_string())
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.get("cache:session:short").await.unwrap(), None);
        assert_eq!(
            cache.get("cache:session:long").await.unwrap(),
            Some("l".to_string())
        );
    }

    #[tokio::test]
    async fn incr_respects_limit_without_clamping() {
        let cache = service();
        let ttl = Duration::from_secs(60);

        for expected in 1..=3 {
            let outcome = cache.incr_with_limit("usage:u1:scan:d", 1, 3, ttl).await.unwrap();
            assert!(outcome.applied);
            assert_eq!(outcome.value, expected);
        }

        // Fourth increment is rejected, value untouched
        let outcome = cache.incr_with_limit("usage:u1:scan:d", 1, 3, ttl).await.unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.value, 3);
    }

    #[tokio::test]
    async fn negative_limit_is_unbounded() {
        let cache = service();
        let ttl = Duration::from_secs(60);
        for _ in 0..100 {
            let outcome = cache.incr_with_limit("usage:u2:scan:d", 1, -1, ttl).await.unwrap();
            assert!(outcome.applied);
        }
    }

    #[tokio::test]
    async fn expired_counter_restarts() {
        let cache = service();
        let outcome = cache
            .incr_with_limit("usage:u3:scan:d", 2, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome.value, 2);

        // Zero TTL expires immediately; the next increment starts fresh
        let outcome = cache
            .incr_with_limit("usage:u3:scan:d", 1, 10, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(outcome.value, 1);
    }

    #[tokio::test]
    async fn decr_floors_at_zero() {
        let cache = service();
        cache
            .incr_with_limit("usage:u4:scan:d", 2, 10, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.decr_floor("usage:u4:scan:d", 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_prefix_removes_counters() {
        let cache = service();
        let ttl = Duration::from_secs(60);
        cache.incr_with_limit("usage:u5:scan:d", 1, 10, ttl).await.unwrap();
        cache.incr_with_limit("usage:u6:scan:d", 1, 10, ttl).await.unwrap();
        cache.incr_with_limit("other:u5", 1, 10, ttl).await.unwrap();

        let removed = cache.clear_prefix("usage:").await.unwrap();
        assert_eq!(removed, 2);

        let outcome = cache.incr_with_limit("usage:u5:scan:d", 1, 10, ttl).await.unwrap();
        assert_eq!(outcome.value, 1);
    }
}
