//! # External Service Capabilities
//!
//! Trait seams for the services the pipeline consumes but does not own:
//! the card classifier, the identity provider, the subscription store, and
//! the backend collection store.
//! Production wiring injects real clients; tests and degraded modes inject
//! the in-memory implementations.

pub mod classifier;
pub mod collection;
pub mod identity;
pub mod subscription;

pub use classifier::{Classification, Classifier, ScanRequest};
pub use collection::{CollectionStore, MemoryCollectionStore};
pub use identity::{ConnectionMode, IdentityProvider, StaticIdentityProvider};
pub use subscription::{MemorySubscriptionStore, SubscriptionStore};
