//! Collection store capability.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// The user's card collection in the backend datastore.
///
/// `add` must be idempotent per `(user, card)`: replaying a queued add of a
/// card the user already owns is a no-op, not an error.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn add(&self, user_id: &str, card_id: &str) -> Result<()>;

    async fn count(&self, user_id: &str) -> Result<i64>;
}

/// In-process collection table.
#[derive(Debug, Default)]
pub struct MemoryCollectionStore {
    cards: DashMap<String, Vec<String>>,
}

impl MemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, user_id: &str, card_id: &str) -> bool {
        self.cards
            .get(user_id)
            .map(|cards| cards.iter().any(|c| c == card_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl CollectionStore for MemoryCollectionStore {
    async fn add(&self, user_id: &str, card_id: &str) -> Result<()> {
        let mut cards = self.cards.entry(user_id.to_string()).or_default();
        if !cards.iter().any(|c| c == card_id) {
            cards.push(card_id.to_string());
        }
        Ok(())
    }

    async fn count(&self, user_id: &str) -> Result<i64> {
        Ok(self
            .cards
            .get(user_id)
            .map(|cards| cards.len() as i64)
            .unwrap_or(0))
    }
}
