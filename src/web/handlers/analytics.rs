//! Analytics query endpoints.

use crate::analytics::{LeaderboardEntry, RollingStats};
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MAX_WINDOW_DAYS: u32 = 365;

fn default_window_days() -> u32 {
    7
}

fn default_top() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_top")]
    pub top: usize,
}

fn validate_window(window_days: u32) -> ApiResult<()> {
    if window_days == 0 || window_days > MAX_WINDOW_DAYS {
        return Err(ApiError::BadRequest {
            message: format!("window_days must be between 1 and {MAX_WINDOW_DAYS}"),
        });
    }
    Ok(())
}

/// `GET /v1/analytics/stats?window_days=N`
pub async fn get_stats(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> ApiResult<Json<RollingStats>> {
    validate_window(params.window_days)?;
    Ok(Json(state.analytics.stats(params.window_days)))
}

#[derive(Debug, Serialize)]
pub struct ErrorBreakdownResponse {
    pub window_days: u32,
    pub errors: HashMap<String, u64>,
}

/// `GET /v1/analytics/errors?window_days=N`
pub async fn get_error_breakdown(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> ApiResult<Json<ErrorBreakdownResponse>> {
    validate_window(params.window_days)?;
    Ok(Json(ErrorBreakdownResponse {
        window_days: params.window_days,
        errors: state.analytics.error_breakdown(params.window_days),
    }))
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub window_days: u32,
    pub entries: Vec<LeaderboardEntry>,
}

/// `GET /v1/analytics/leaderboard?window_days=N&top=K`
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> ApiResult<Json<LeaderboardResponse>> {
    validate_window(params.window_days)?;
    Ok(Json(LeaderboardResponse {
        window_days: params.window_days,
        entries: state.analytics.leaderboard(params.window_days, params.top),
    }))
}
