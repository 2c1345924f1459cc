//! Subscription store capability.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Maps users to their subscription tier name. Tier tables themselves live
/// in configuration; this store only answers "which tier is this user on".
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Tier name for a user, or `None` when the user has no subscription
    /// record (callers fall back to the configured default tier).
    async fn tier_of(&self, user_id: &str) -> Result<Option<String>>;
}

/// In-process subscription table.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    tiers: DashMap<String, String>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tier(&self, user_id: impl Into<String>, tier: impl Into<String>) {
        self.tiers.insert(user_id.into(), tier.into());
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn tier_of(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.tiers.get(user_id).map(|t| t.value().clone()))
    }
}
