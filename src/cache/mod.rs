//! # Cache Layer
//!
//! Dual-backend key/value store with TTL:
//!
//! ```text
//! CacheProvider
//!   ├── RedisCacheService   <- primary, networked, shared across instances
//!   └── MemoryCacheService  <- fallback, bounded in-process store
//! ```
//!
//! ## Design Decisions
//!
//! - **Transparent fallback**: the primary is wrapped by the health monitor's
//!   `cache` circuit; when it opens (or any primary call fails) the operation
//!   reruns on the in-process backend, so callers never need backend-awareness
//! - **Atomic counters**: `incr_with_limit` is a Lua script on the primary and
//!   an entry-locked mutation on the fallback - no read-then-write races
//! - **SCAN for prefixes**: prefix clearing never uses KEYS
//! - **Introspectable**: `backend()` reports Primary/Fallback so the usage
//!   governor can widen its safety margin when cross-instance atomicity is gone

pub mod errors;
pub mod provider;
pub mod providers;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use provider::{CacheBackendKind, CacheProvider, CACHE_DEPENDENCY};
pub use providers::{MemoryCacheService, RedisCacheService};
pub use traits::{CacheService, IncrOutcome};
