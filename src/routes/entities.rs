//! Game-data route configuration
//!
//! Entity CRUD and the required-items aggregate under `/api/v1`. Reads admit
//! any valid bearer; mutating handlers enforce the admin role themselves.

use axum::{routing::get, Router};

use crate::handlers::entities::*;
use crate::state::AppState;

/// Creates the data-entity routes with state injection
pub fn create_entity_routes(shared_state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .route("/items/required", get(items_required))
                .route("/{entity}", get(entity_list).post(entity_create))
                .route(
                    "/{entity}/{id}",
                    get(entity_read).put(entity_update).delete(entity_delete),
                ),
        )
        .with_state(shared_state)
}
