//! Cache service trait definition.

use super::errors::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of an atomic increment-with-limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrOutcome {
    /// Whether the increment was applied (false means the limit would have
    /// been exceeded and the stored value was left untouched).
    pub applied: bool,
    /// The stored value after the operation.
    pub value: i64,
}

/// Trait defining cache operations
///
/// Implemented by concrete cache backends (Redis, in-process memory).
/// Object-safe so the provider can take any backend as its primary.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Get a value from the cache by key
    ///
    /// Returns `Ok(Some(value))` on cache hit, `Ok(None)` on cache miss.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value in the cache with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Delete a specific key from the cache
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete all keys with the given prefix, returning the number removed
    /// where the backend can count them
    async fn clear_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Atomically increment `key` by `amount` unless the result would exceed
    /// `limit` (a limit below zero means unbounded). Initializes the counter
    /// with `ttl` on first use; rejected increments leave the value untouched.
    async fn incr_with_limit(
        &self,
        key: &str,
        amount: i64,
        limit: i64,
        ttl: Duration,
    ) -> CacheResult<IncrOutcome>;

    /// Atomically decrement `key` by `amount`, flooring at zero.
    /// Returns the stored value after the operation.
    async fn decr_floor(&self, key: &str, amount: i64) -> CacheResult<i64>;

    /// Check if the cache backend is healthy
    async fn health_check(&self) -> CacheResult<bool>;

    /// Get the name of the cache backend
    fn provider_name(&self) -> &'static str;

    /// Whether this backend is shared across process instances
    fn is_distributed(&self) -> bool;
}
