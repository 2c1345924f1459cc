//! Identity provider capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// How the service is currently authenticating users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Primary identity backend reachable; full functionality.
    Primary = 0,
    /// Primary unreachable; sessions validated against local state.
    LocalFallback = 1,
    /// No connectivity; writes are deferred to the offline queue.
    Offline = 2,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Primary => "primary",
            ConnectionMode::LocalFallback => "local_fallback",
            ConnectionMode::Offline => "offline",
        }
    }
}

impl From<u8> for ConnectionMode {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionMode::Primary,
            1 => ConnectionMode::LocalFallback,
            _ => ConnectionMode::Offline,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn mode(&self) -> ConnectionMode;
}

/// Identity provider with an externally-set mode. Used in tests and by
/// hosts that track connectivity themselves.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    mode: AtomicU8,
}

impl StaticIdentityProvider {
    pub fn new(mode: ConnectionMode) -> Self {
        Self {
            mode: AtomicU8::new(mode as u8),
        }
    }

    pub fn set_mode(&self, mode: ConnectionMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn mode(&self) -> ConnectionMode {
        ConnectionMode::from(self.mode.load(Ordering::Relaxed))
    }
}
