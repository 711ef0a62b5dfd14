//! Progress route configuration
//!
//! Per-user progress endpoints under `/api/v1/progress/{entity}`. Handlers
//! scope every query to the authenticated caller.

use axum::{routing::get, Router};

use crate::handlers::progress::*;
use crate::state::AppState;

/// Creates the progress routes with state injection
pub fn create_progress_routes(shared_state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1/progress",
            Router::new().route("/{entity}", get(progress_list).put(progress_update)),
        )
        .with_state(shared_state)
}
