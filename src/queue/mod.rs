//! # Offline Queue
//!
//! Durable store-and-forward buffer for write actions that cannot reach
//! their dependency. Entries are ordered FIFO per owner by a monotonic
//! UUIDv7 id, deduplicated per owner by an idempotency key, capped per
//! owner, and replayed by a background worker when the dependency
//! recovers. Entries that exhaust their replay budget or fail terminally
//! are dead-lettered, never silently dropped.

pub mod entry;
pub mod offline_queue;
pub mod replay;
pub mod store;

pub use entry::{QueueEntry, QueueEntryStatus};
pub use offline_queue::OfflineQueue;
pub use replay::{DrainHandle, ReplayHandler, ReplayWorker};
pub use store::{MemoryQueueStore, PgQueueStore, QueueStore};
