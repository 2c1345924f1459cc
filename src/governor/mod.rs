//! # Usage Governor
//!
//! Tier-based daily usage quotas enforced through atomic cache counters.
//! Reservations happen before the governed action runs; a reservation that
//! would exceed the tier limit is rejected without mutating the counter, so
//! concurrent submissions at the limit edge admit exactly the remaining
//! budget and no more. Callers compensate failed actions with [`release`].
//!
//! Counter keys are `usage:{user}:{resource}:{YYYYMMDD}` in UTC with a TTL
//! to the end of the day, so budgets reset at UTC midnight without a sweep.
//!
//! [`release`]: UsageGovernor::release

use crate::cache::{CacheBackendKind, CacheProvider};
use crate::config::GovernorConfig;
use crate::error::{CoreError, Result};
use crate::services::SubscriptionStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageDecision {
    pub allowed: bool,
    /// Budget left after this decision; `-1` means the tier is unlimited.
    pub remaining: i64,
    /// Start of the next UTC day, when the counter resets.
    pub reset_at: DateTime<Utc>,
}

impl UsageDecision {
    fn unlimited(reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining: -1,
            reset_at,
        }
    }
}

/// Enforces per-user, per-resource daily budgets.
pub struct UsageGovernor {
    cache: Arc<CacheProvider>,
    subscriptions: Arc<dyn SubscriptionStore>,
    config: GovernorConfig,
}

impl UsageGovernor {
    pub fn new(
        cache: Arc<CacheProvider>,
        subscriptions: Arc<dyn SubscriptionStore>,
        config: GovernorConfig,
    ) -> Self {
        Self {
            cache,
            subscriptions,
            config,
        }
    }

    /// Atomically reserve `amount` units of `resource` for `user` against
    /// today's budget.
    ///
    /// While the cache layer runs on its in-process fallback the effective
    /// limit shrinks by the configured safety margin, since other instances
    /// may be admitting reservations against counters this one cannot see.
    ///
    /// The counter mutation is bounded by `deadline`; a primary backend that
    /// hangs past it yields [`CoreError::DeadlineExceeded`] instead of
    /// stalling the caller.
    pub async fn check_and_reserve(
        &self,
        user_id: &str,
        resource: &str,
        amount: i64,
        deadline: Instant,
    ) -> Result<UsageDecision> {
        if amount <= 0 {
            return Err(CoreError::Validation(format!(
                "Reservation amount must be positive, got {amount}"
            )));
        }

        let now = Utc::now();
        let reset_at = next_period_start(now);
        let limit = self.limit_for(user_id, resource).await?;
        if limit < 0 {
            return Ok(UsageDecision::unlimited(reset_at));
        }

        let effective_limit = match self.cache.backend() {
            CacheBackendKind::Primary => limit,
            CacheBackendKind::Fallback => {
                let reduced =
                    (limit as f64 * (1.0 - self.config.fallback_safety_margin)).floor() as i64;
                let reduced = reduced.max(1).min(limit);
                warn!(
                    user_id = %user_id,
                    resource = %resource,
                    limit = limit,
                    effective_limit = reduced,
                    "Cache in fallback mode, applying quota safety margin"
                );
                reduced
            }
        };

        let key = period_key(user_id, resource, now);
        let ttl = ttl_until(reset_at, now);
        let outcome = tokio::time::timeout_at(
            deadline,
            self.cache.incr_with_limit(&key, amount, effective_limit, ttl),
        )
        .await
        .map_err(|_| {
            CoreError::DeadlineExceeded(format!(
                "Usage reservation for '{user_id}:{resource}' exceeded its deadline"
            ))
        })??;

        // Remaining is measured against the limit actually enforced, so a
        // margin-tightened rejection never reports leftover budget.
        let decision = UsageDecision {
            allowed: outcome.applied,
            remaining: (effective_limit - outcome.value).max(0),
            reset_at,
        };
        debug!(
            user_id = %user_id,
            resource = %resource,
            amount = amount,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Usage reservation decided"
        );
        Ok(decision)
    }

    /// Compensate a reservation whose governed action ultimately failed.
    /// The counter never goes below zero, so a stray release cannot grant
    /// extra budget.
    pub async fn release(&self, user_id: &str, resource: &str, amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(CoreError::Validation(format!(
                "Release amount must be positive, got {amount}"
            )));
        }
        if self.limit_for(user_id, resource).await? < 0 {
            // Unlimited tiers never reserved anything.
            return Ok(());
        }
        let key = period_key(user_id, resource, Utc::now());
        let value = self.cache.decr_floor(&key, amount).await?;
        debug!(user_id = %user_id, resource = %resource, amount = amount, value = value, "Usage reservation released");
        Ok(())
    }

    /// The collection size cap for a user's tier; `-1` means uncapped.
    pub async fn collection_cap(&self, user_id: &str) -> Result<i64> {
        let tier = self.tier_name(user_id).await?;
        Ok(self.config.tier(&tier).collection_cap)
    }

    async fn limit_for(&self, user_id: &str, resource: &str) -> Result<i64> {
        let tier = self.tier_name(user_id).await?;
        Ok(self.config.tier(&tier).daily_limit(resource))
    }

    async fn tier_name(&self, user_id: &str) -> Result<String> {
        Ok(self
            .subscriptions
            .tier_of(user_id)
            .await?
            .unwrap_or_else(|| self.config.default_tier.clone()))
    }
}

/// `usage:{user}:{resource}:{YYYYMMDD}` in UTC.
pub fn period_key(user_id: &str, resource: &str, now: DateTime<Utc>) -> String {
    format!("usage:{}:{}:{}", user_id, resource, now.format("%Y%m%d"))
}

/// Start of the next UTC day.
pub fn next_period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    (now + ChronoDuration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}

fn ttl_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (reset_at - now).to_std().unwrap_or(Duration::from_secs(60))
}
