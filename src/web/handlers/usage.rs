//! Usage quota endpoint.

use crate::governor::UsageDecision;
use crate::web::errors::ApiResult;
use crate::web::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

fn default_amount() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UsageCheckRequest {
    pub user_id: String,
    pub resource: String,
    #[serde(default = "default_amount")]
    pub amount: i64,
}

/// `POST /v1/usage/check`
///
/// Reserves budget when allowed. A rejected reservation is still a 200
/// response with `allowed: false`; the caller decides what to surface.
pub async fn check_usage(
    State(state): State<AppState>,
    Json(request): Json<UsageCheckRequest>,
) -> ApiResult<Json<UsageDecision>> {
    if request.user_id.is_empty() {
        return Err(crate::web::errors::ApiError::BadRequest {
            message: "user_id must not be empty".to_string(),
        });
    }

    let deadline = tokio::time::Instant::now() + state.config.request_timeout();
    let decision = state
        .governor
        .check_and_reserve(&request.user_id, &request.resource, request.amount, deadline)
        .await?;
    debug!(
        user_id = %request.user_id,
        resource = %request.resource,
        allowed = decision.allowed,
        "Usage check handled"
    );
    Ok(Json(decision))
}
