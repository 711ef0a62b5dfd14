//! Administrative route configuration with authentication middleware
//!
//! Management endpoints under `/api/v1/admin`, protected as a group by the
//! admin middleware, which also injects the authenticated admin into request
//! extensions for the handlers that default ownership to the caller.

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::auth::admin_auth_middleware;
use crate::handlers::admin::*;
use crate::state::AppState;

/// Creates administrative routes with state injection
pub fn create_admin_routes(shared_state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1/admin",
            Router::new()
                .route("/api-keys", post(api_key_create).get(api_key_list))
                .route("/api-keys/{id}", axum::routing::delete(api_key_revoke))
                .route("/sync", post(sync_trigger))
                .route("/sync/status", get(sync_status))
                .route("/tokens/{id}/revoke", post(token_revoke))
                .route("/audit", get(audit_window))
                .route("/users/{id}/role", put(user_role_update))
                .route_layer(middleware::from_fn_with_state(
                    shared_state.clone(),
                    admin_auth_middleware,
                )),
        )
        .with_state(shared_state)
}
