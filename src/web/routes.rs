//! HTTP route definitions.

use crate::web::handlers;
use crate::web::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// API v1 routes, mounted under `/v1`:
/// - Usage API - quota checks and reservations
/// - Status API - dependency health and connection state
/// - Analytics API - rolling stats, error breakdowns, leaderboard
/// - Queue API - offline-queue administration
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/usage/check", post(handlers::usage::check_usage))
        .route("/status", get(handlers::status::get_status))
        .route("/analytics/stats", get(handlers::analytics::get_stats))
        .route(
            "/analytics/errors",
            get(handlers::analytics::get_error_breakdown),
        )
        .route(
            "/analytics/leaderboard",
            get(handlers::analytics::get_leaderboard),
        )
        .route("/queue/:owner_id/drain", post(handlers::queue::drain_owner))
        .route(
            "/queue/:owner_id/dead-letters",
            get(handlers::queue::list_dead_letters),
        )
}

/// Health routes at the root, outside the versioned API.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::basic_health))
}
