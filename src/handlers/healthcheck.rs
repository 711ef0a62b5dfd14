//! Health check and system status endpoints
//!
//! Public endpoints for monitoring system health and database connectivity.
//! Designed for use with load balancers and orchestration platforms. All of
//! them bypass rate limiting.

use axum::extract::State;

use crate::error::AppError;
use crate::state::AppState;

/// Basic health endpoint: the process is up and serving.
#[utoipa::path(
    get,
    path = "/health",
    operation_id = "api_health_check",
    tag = "healthcheck_endpoints",

    responses(
        (status = 200, description = "API service is alive and responding to requests", body = String),
    )
)]
pub async fn health() -> String {
    "ok".to_string()
}

/// Liveness probe. No dependency checks, only that the process responds.
#[utoipa::path(
    get,
    context_path = "/health",
    path = "/live",
    operation_id = "api_liveness_check",
    tag = "healthcheck_endpoints",

    responses(
        (status = 200, description = "API service is alive and responding to requests", body = String),
    )
)]
pub async fn live() -> String {
    "alive".to_string()
}

/// Readiness probe: acquires a pooled connection and pings the database.
#[utoipa::path(
    get,
    context_path = "/health",
    path = "/ready",
    operation_id = "api_db_connection_test",
    tag = "healthcheck_endpoints",

    responses(
        (status = 200, description = "API is ready and database connection is successful", body = String),
        (status = 503, description = "API is not ready - database connection failed"),
    )
)]
pub async fn ready(State(state): State<AppState>) -> Result<String, AppError> {
    use sqlx::Connection;

    let mut conn = state
        .dbpool
        .acquire()
        .await
        .map_err(|e| AppError::Unavailable(format!("database pool unavailable: {e}")))?;
    conn.ping()
        .await
        .map(|_| "ready".to_string())
        .map_err(|e| AppError::Unavailable(format!("database ping failed: {e}")))
}
