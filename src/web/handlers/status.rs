//! Service status endpoint.

use crate::pipeline::DATASTORE_DEPENDENCY;
use crate::resilience::DependencyStatus;
use crate::services::ConnectionMode;
use crate::web::errors::ApiResult;
use crate::web::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct DependencyStatusBody {
    pub status: String,
    pub consecutive_failures: u32,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub dependencies: HashMap<String, DependencyStatusBody>,
    pub offline_queue_size: usize,
    /// `connected`, `degraded`, `local_fallback` or `offline`.
    pub connection_status: String,
}

fn connection_status(mode: ConnectionMode, datastore: DependencyStatus) -> &'static str {
    match (mode, datastore) {
        (ConnectionMode::Offline, _) => "offline",
        (_, DependencyStatus::Unavailable) => "offline",
        (ConnectionMode::LocalFallback, _) => "local_fallback",
        (ConnectionMode::Primary, DependencyStatus::Degraded) => "degraded",
        (ConnectionMode::Primary, _) => "connected",
    }
}

/// `GET /v1/status`
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let dependencies = state
        .monitor
        .snapshot()
        .into_iter()
        .map(|(name, health)| {
            (
                name,
                DependencyStatusBody {
                    status: health.status.as_str().to_string(),
                    consecutive_failures: health.consecutive_failures,
                },
            )
        })
        .collect();

    let mode = state.identity.mode().await;
    let datastore = state.monitor.status(DATASTORE_DEPENDENCY);

    Ok(Json(StatusResponse {
        dependencies,
        offline_queue_size: state.queue.size().await?,
        connection_status: connection_status(mode, datastore).to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_status_prioritizes_offline() {
        assert_eq!(
            connection_status(ConnectionMode::Offline, DependencyStatus::Healthy),
            "offline"
        );
        assert_eq!(
            connection_status(ConnectionMode::Primary, DependencyStatus::Unavailable),
            "offline"
        );
        assert_eq!(
            connection_status(ConnectionMode::LocalFallback, DependencyStatus::Healthy),
            "local_fallback"
        );
        assert_eq!(
            connection_status(ConnectionMode::Primary, DependencyStatus::Degraded),
            "degraded"
        );
        assert_eq!(
            connection_status(ConnectionMode::Primary, DependencyStatus::Healthy),
            "connected"
        );
    }
}
