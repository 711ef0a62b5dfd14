//! Health check routes for monitoring systems
//!
//! Provides `/health`, `/health/ready`, and `/health/live` endpoints for
//! liveness and readiness probes. Suitable for load balancers and
//! orchestration platforms. These bypass rate limiting by path.

use axum::{routing::get, Router};

use crate::handlers::healthcheck::*;
use crate::state::AppState;

/// Creates health check routes with monitoring-optimized configuration
pub fn create_health_routes(shared_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Orchestrators probe both spellings; serve the short ones too.
        .route("/ready", get(ready))
        .route("/live", get(live))
        .nest(
            "/health",
            Router::new()
                .route("/ready", get(ready))
                .route("/live", get(live)),
        )
        .with_state(shared_state)
}
