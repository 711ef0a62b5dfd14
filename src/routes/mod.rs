//! HTTP route configuration and middleware setup
//!
//! Combines all route modules with the global middleware chain. Execution
//! order for a request, outermost first: tracing and compression, HTTPS
//! redirect, request-size limit (GET/HEAD/OPTIONS pass through), security
//! headers, CORS (preflights short-circuit here with 204 or 403), audit
//! logging, rate limiting, then the route group's own admission.
//!
//! # Route Groups
//! - `/health`, `/health/ready`, `/health/live` - probes, never rate limited
//! - `/api/v1/auth/*` - login, refresh, PKCE, GitHub OAuth, handoff exchange
//! - `/api/v1/{entity}` - data reads (any bearer) and writes (admin)
//! - `/api/v1/progress/*` - per-user progress
//! - `/api/v1/admin/*` - management, behind the admin middleware
//! - `/swagger-ui`, `/redoc`, `/scalar`, `/rapidoc` - optional documentation

use axum::{middleware, Router};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod auth;
pub mod entities;
pub mod healthcheck;
pub mod openapi;
pub mod progress;

use crate::middleware::audit::audit_middleware;
use crate::middleware::limits::request_size_limit;
use crate::middleware::rate_limit::rate_limit_middleware;
use crate::middleware::security::{cors, https_redirect, security_headers};
use crate::state::AppState;
use admin::create_admin_routes;
use auth::create_auth_routes;
use entities::create_entity_routes;
use healthcheck::create_health_routes;
use openapi::create_apidocs_routes;
use progress::create_progress_routes;

/// Creates the main application router with all route modules and middleware
pub async fn create_router(shared_state: AppState) -> Router {
    let compression_layer = CompressionLayer::new().br(true).gzip(true);

    let health_routes = create_health_routes(shared_state.clone());
    let auth_routes = create_auth_routes(shared_state.clone());
    let entity_routes = create_entity_routes(shared_state.clone());
    let progress_routes = create_progress_routes(shared_state.clone());
    let admin_routes = create_admin_routes(shared_state.clone());
    let apidocs_routes = create_apidocs_routes(shared_state.clone());

    // Layers wrap everything added before them, so the chain reads bottom-up
    // from here: the last layer is the outermost stage.
    Router::new()
        .merge(health_routes)
        .merge(auth_routes)
        .merge(entity_routes)
        .merge(progress_routes)
        .merge(admin_routes)
        .merge(apidocs_routes)
        .layer(middleware::from_fn_with_state(
            shared_state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            shared_state.clone(),
            audit_middleware,
        ))
        .layer(middleware::from_fn_with_state(shared_state.clone(), cors))
        .layer(middleware::from_fn_with_state(
            shared_state.clone(),
            security_headers,
        ))
        .layer(middleware::from_fn(https_redirect))
        .layer(middleware::from_fn(request_size_limit))
        .layer(compression_layer)
        .layer(TraceLayer::new_for_http())
}
