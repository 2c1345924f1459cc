//! Cache backend implementations.

pub mod memory;
pub mod redis;

pub use self::redis::RedisCacheService;
pub use memory::MemoryCacheService;
