//! # Configuration System
//!
//! Component-scoped configuration for the resilience core. All operating
//! parameters that are product decisions (tier limits, queue bounds, breaker
//! thresholds, flush cadence) live here rather than in code: the defaults match
//! the documented behavior, and a deployment overrides them via TOML and
//! `SCANDECK_`-prefixed environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scandeck_core::config::CoreConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from SCANDECK_CONFIG_PATH (optional) + environment overrides
//! let config = CoreConfig::load()?;
//! assert!(config.queue.max_entries_per_owner > 0);
//! # Ok(())
//! # }
//! ```

mod loader;

pub use loader::CoreConfig;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Health monitor thresholds and probe cadence.
///
/// Transitions are hysteretic: `degraded_threshold` consecutive failures move a
/// dependency Healthy → Degraded, `unavailable_threshold` move it Degraded →
/// Unavailable, and only `success_threshold` consecutive successes restore
/// Healthy. Per-dependency overrides take precedence over the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: u32,
    #[serde(default = "default_unavailable_threshold")]
    pub unavailable_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Initial cooldown before an Unavailable dependency admits a trial call.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Probe interval cap; the interval doubles on each failed probe.
    #[serde(default = "default_cooldown_max_seconds")]
    pub cooldown_max_seconds: u64,
    /// Per-dependency threshold overrides keyed by dependency name.
    #[serde(default)]
    pub dependency_overrides: HashMap<String, DependencyHealthOverride>,
}

/// Partial override of the health thresholds for one dependency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyHealthOverride {
    pub degraded_threshold: Option<u32>,
    pub unavailable_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub cooldown_seconds: Option<u64>,
}

impl HealthConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn cooldown_max(&self) -> Duration {
        Duration::from_secs(self.cooldown_max_seconds)
    }

    /// Effective thresholds for a named dependency, with overrides applied.
    pub fn for_dependency(&self, name: &str) -> ResolvedHealthThresholds {
        let ov = self.dependency_overrides.get(name);
        ResolvedHealthThresholds {
            degraded_threshold: ov
                .and_then(|o| o.degraded_threshold)
                .unwrap_or(self.degraded_threshold),
            unavailable_threshold: ov
                .and_then(|o| o.unavailable_threshold)
                .unwrap_or(self.unavailable_threshold),
            success_threshold: ov
                .and_then(|o| o.success_threshold)
                .unwrap_or(self.success_threshold),
            cooldown: Duration::from_secs(
                ov.and_then(|o| o.cooldown_seconds)
                    .unwrap_or(self.cooldown_seconds),
            ),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: default_degraded_threshold(),
            unavailable_threshold: default_unavailable_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            cooldown_max_seconds: default_cooldown_max_seconds(),
            dependency_overrides: HashMap::new(),
        }
    }
}

/// Thresholds after applying per-dependency overrides.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedHealthThresholds {
    pub degraded_threshold: u32,
    pub unavailable_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

/// Immutable retry policy for one call-site.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplicative jitter: delays are scaled by a factor drawn uniformly
    /// from `1 - jitter_ratio ..= 1 + jitter_ratio`.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

/// Retry policies keyed by call-site name, with a fallback default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub default_policy: RetryPolicy,
    #[serde(default)]
    pub policies: HashMap<String, RetryPolicy>,
}

impl RetryConfig {
    pub fn policy_for(&self, call_site: &str) -> RetryPolicy {
        self.policies
            .get(call_site)
            .copied()
            .unwrap_or(self.default_policy)
    }
}

/// Offline queue bounds and replay behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Per-owner cap; `enqueue` past this fails fast with `QueueFull`.
    #[serde(default = "default_max_entries_per_owner")]
    pub max_entries_per_owner: usize,
    /// Upper bound on concurrently replaying owners.
    #[serde(default = "default_replay_concurrency")]
    pub replay_concurrency: usize,
    /// How long Completed entries are retained for idempotency-key dedup.
    #[serde(default = "default_completed_grace_seconds")]
    pub completed_grace_seconds: u64,
    /// TTL of the in-process seen-set that rejects duplicate submissions
    /// arriving through a parallel path during replay.
    #[serde(default = "default_seen_set_ttl_seconds")]
    pub seen_set_ttl_seconds: u64,
    /// Replay attempts (across wakes) before an entry is dead-lettered.
    #[serde(default = "default_max_replay_attempts")]
    pub max_replay_attempts: u32,
    /// Wall-clock budget for replaying a single entry, including its retries.
    #[serde(default = "default_replay_entry_timeout_seconds")]
    pub replay_entry_timeout_seconds: u64,
}

impl QueueConfig {
    pub fn completed_grace(&self) -> Duration {
        Duration::from_secs(self.completed_grace_seconds)
    }

    pub fn seen_set_ttl(&self) -> Duration {
        Duration::from_secs(self.seen_set_ttl_seconds)
    }

    pub fn replay_entry_timeout(&self) -> Duration {
        Duration::from_secs(self.replay_entry_timeout_seconds)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_entries_per_owner: default_max_entries_per_owner(),
            replay_concurrency: default_replay_concurrency(),
            completed_grace_seconds: default_completed_grace_seconds(),
            seen_set_ttl_seconds: default_seen_set_ttl_seconds(),
            max_replay_attempts: default_max_replay_attempts(),
            replay_entry_timeout_seconds: default_replay_entry_timeout_seconds(),
        }
    }
}

/// Daily limits and collection cap for one subscription tier.
///
/// A limit of `-1` means unlimited, matching the subscription product model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default)]
    pub daily_limits: HashMap<String, i64>,
    #[serde(default = "default_collection_cap")]
    pub collection_cap: i64,
}

impl TierConfig {
    /// Daily limit for a resource; unknown resources are unlimited.
    pub fn daily_limit(&self, resource: &str) -> i64 {
        self.daily_limits.get(resource).copied().unwrap_or(-1)
    }
}

/// Usage governor tier tables and fallback behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Tier tables keyed by tier name. Product configuration, not constants.
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, TierConfig>,
    /// Tier assumed when the subscription store has no entry for a user.
    #[serde(default = "default_tier_name")]
    pub default_tier: String,
    /// Fraction subtracted from the hard limit while the cache layer runs on
    /// its in-process fallback, where cross-instance atomicity is not
    /// guaranteed. 0.1 reserves to 90% of the limit in fallback mode.
    #[serde(default = "default_fallback_safety_margin")]
    pub fallback_safety_margin: f64,
}

impl GovernorConfig {
    pub fn tier(&self, name: &str) -> TierConfig {
        self.tiers
            .get(name)
            .or_else(|| self.tiers.get(&self.default_tier))
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            default_tier: default_tier_name(),
            fallback_safety_margin: default_fallback_safety_margin(),
        }
    }
}

/// Cache layer backend selection and TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Primary backend: "redis" (networked) or "memory" (single-process).
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    #[serde(default = "default_cache_ttl_seconds")]
    pub default_ttl_seconds: u64,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub memory: MemoryCacheConfig,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            default_ttl_seconds: default_cache_ttl_seconds(),
            redis: None,
            memory: MemoryCacheConfig::default(),
        }
    }
}

/// Connection settings for the primary (networked) cache backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Bounds for the in-process fallback cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    #[serde(default = "default_memory_capacity")]
    pub max_capacity: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_memory_capacity(),
        }
    }
}

/// Analytics write buffering and flush cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Flush at this interval even when the batch is small.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Flush as soon as this many records are buffered.
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
    /// Bounded channel capacity between `record` callers and the flush task.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl AnalyticsConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            flush_batch_size: default_flush_batch_size(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Web API bind address and request timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl WebConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Durable store connection settings (queue entries and outcome records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_degraded_threshold() -> u32 {
    3
}
fn default_unavailable_threshold() -> u32 {
    6
}
fn default_success_threshold() -> u32 {
    2
}
fn default_cooldown_seconds() -> u64 {
    30
}
fn default_cooldown_max_seconds() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_jitter_ratio() -> f64 {
    0.25
}
fn default_max_entries_per_owner() -> usize {
    500
}
fn default_replay_concurrency() -> usize {
    8
}
fn default_completed_grace_seconds() -> u64 {
    3_600
}
fn default_seen_set_ttl_seconds() -> u64 {
    600
}
fn default_max_replay_attempts() -> u32 {
    5
}
fn default_replay_entry_timeout_seconds() -> u64 {
    30
}
fn default_collection_cap() -> i64 {
    -1
}
fn default_tier_name() -> String {
    "free".to_string()
}
fn default_fallback_safety_margin() -> f64 {
    0.1
}
fn default_cache_backend() -> String {
    "redis".to_string()
}
fn default_cache_ttl_seconds() -> u64 {
    86_400
}
fn default_memory_capacity() -> u64 {
    100_000
}
fn default_flush_interval_ms() -> u64 {
    2_000
}
fn default_flush_batch_size() -> usize {
    100
}
fn default_buffer_capacity() -> usize {
    1_024
}
fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_connections() -> u32 {
    10
}

/// Default tier tables mirroring the subscription product model. Deployments
/// override these via configuration; nothing reads limits from anywhere else.
fn default_tiers() -> HashMap<String, TierConfig> {
    let mut tiers = HashMap::new();
    tiers.insert(
        "free".to_string(),
        TierConfig {
            daily_limits: HashMap::from([
                ("scans".to_string(), 10),
                ("api_calls".to_string(), 100),
            ]),
            collection_cap: 100,
        },
    );
    tiers.insert(
        "basic".to_string(),
        TierConfig {
            daily_limits: HashMap::from([
                ("scans".to_string(), 100),
                ("api_calls".to_string(), 1_000),
            ]),
            collection_cap: 1_000,
        },
    );
    tiers.insert(
        "premium".to_string(),
        TierConfig {
            daily_limits: HashMap::from([
                ("scans".to_string(), 1_000),
                ("api_calls".to_string(), 10_000),
            ]),
            collection_cap: 10_000,
        },
    );
    tiers.insert(
        "unlimited".to_string(),
        TierConfig {
            daily_limits: HashMap::from([
                ("scans".to_string(), -1),
                ("api_calls".to_string(), -1),
            ]),
            collection_cap: -1,
        },
    );
    tiers
}
