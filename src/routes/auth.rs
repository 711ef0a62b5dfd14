//! Authentication route configuration
//!
//! Configures the token endpoints under `/api/v1/auth`.
//!
//! # Routes
//! - `POST /api/v1/auth/login` - API-key login
//! - `POST /api/v1/auth/refresh` - refresh rotation
//! - `POST /api/v1/auth/authorize` - PKCE code issuance (authenticated)
//! - `POST /api/v1/auth/token` - PKCE code exchange
//! - `GET /api/v1/auth/me` - the authenticated user
//! - `GET /api/v1/auth/exchange` - one-time handoff exchange
//! - `GET /api/v1/auth/github/login|callback` - GitHub OAuth pair

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::auth::*;
use crate::state::AppState;

/// Creates authentication routes with state injection
pub fn create_auth_routes(shared_state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1/auth",
            Router::new()
                .route("/login", post(login))
                .route("/refresh", post(refresh))
                .route("/authorize", post(authorize))
                .route("/token", post(token))
                .route("/me", get(me))
                .route("/exchange", get(exchange))
                .route("/github/login", get(github_login))
                .route("/github/callback", get(github_callback)),
        )
        .with_state(shared_state)
}
