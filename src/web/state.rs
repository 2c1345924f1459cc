//! Shared application state for the web API.

use crate::analytics::AnalyticsAggregator;
use crate::config::WebConfig;
use crate::governor::UsageGovernor;
use crate::queue::{DrainHandle, OfflineQueue};
use crate::resilience::HealthMonitor;
use crate::services::IdentityProvider;
use std::sync::Arc;

/// State shared across all request handlers. Everything inside is either an
/// `Arc` or already cheap to clone, so handlers clone freely.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WebConfig>,
    pub monitor: Arc<HealthMonitor>,
    pub governor: Arc<UsageGovernor>,
    pub queue: OfflineQueue,
    pub analytics: Arc<AnalyticsAggregator>,
    pub identity: Arc<dyn IdentityProvider>,
    pub drain: DrainHandle,
}
