//! Authentication endpoint handlers
//!
//! API-key login, refresh rotation, the PKCE code flow, the GitHub OAuth
//! redirect pair, and the one-time handoff exchange. Validation happens
//! here; the mechanics live in `auth::orchestrator`.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use validator::Validate;

use crate::auth::orchestrator::{self, validate_redirect_uri};
use crate::error::AppError;
use crate::models::user::{
    AuthResponse, AuthorizeRequest, AuthorizeResponse, AuthUser, ExchangeResponse, LoginRequest,
    RefreshRequest, TokenPairResponse, TokenRequest, User,
};
use crate::state::AppState;

/// API-key login: exchanges a valid key for a short-lived JWT.
#[utoipa::path(
    post,
    context_path = "/api/v1/auth",
    path = "/login",
    operation_id = "auth_login",
    tag = "auth_endpoints",

    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful - JWT returned", body = AuthResponse),
        (status = 400, description = "Malformed request body"),
        (status = 401, description = "Invalid or revoked API key"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    request
        .validate()
        .map_err(|_| AppError::Input("api_key is required".to_string()))?;

    let response = orchestrator::login_with_api_key(&state, &request.api_key).await?;

    Ok(Json(response))
}

/// Refresh rotation: the presented token is revoked, a new pair comes back.
#[utoipa::path(
    post,
    context_path = "/api/v1/auth",
    path = "/refresh",
    operation_id = "auth_refresh",
    tag = "auth_endpoints",

    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Fresh token pair issued", body = TokenPairResponse),
        (status = 401, description = "Refresh token invalid, expired, or already used"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    request
        .validate()
        .map_err(|_| AppError::Input("refresh_token is required".to_string()))?;

    let response = orchestrator::rotate_refresh_token(&state, &request.refresh_token).await?;

    Ok(Json(response))
}

/// PKCE code issuance for an authenticated client.
#[utoipa::path(
    post,
    context_path = "/api/v1/auth",
    path = "/authorize",
    operation_id = "auth_authorize",
    tag = "auth_endpoints",
    security(("bearer_auth" = [])),

    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "One-time authorization code issued", body = AuthorizeResponse),
        (status = 400, description = "Bad challenge method or redirect URI"),
        (status = 401, description = "Not authenticated"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn authorize(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<AuthorizeRequest>,
) -> Result<impl IntoResponse, AppError> {
    request
        .validate()
        .map_err(|_| AppError::Input("invalid authorize request".to_string()))?;

    let response = orchestrator::issue_authorization_code(&state.dbpool, user.id, &request).await?;

    Ok(Json(response))
}

/// PKCE code exchange.
#[utoipa::path(
    post,
    context_path = "/api/v1/auth",
    path = "/token",
    operation_id = "auth_token",
    tag = "auth_endpoints",

    request_body = TokenRequest,
    responses(
        (status = 200, description = "JWT and refresh token issued", body = TokenPairResponse),
        (status = 400, description = "Constraint violation on code, verifier, or redirect URI"),
        (status = 401, description = "Unknown, expired, or mismatched code"),
        (status = 409, description = "Code already consumed"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = orchestrator::exchange_authorization_code(
        &state,
        &request.code,
        &request.code_verifier,
        &request.redirect_uri,
    )
    .await?;

    Ok(Json(response))
}

/// The authenticated caller's own user record.
#[utoipa::path(
    get,
    context_path = "/api/v1/auth",
    path = "/me",
    operation_id = "auth_me",
    tag = "auth_endpoints",
    security(("bearer_auth" = [])),

    responses(
        (status = 200, description = "The authenticated user", body = User),
        (status = 401, description = "Not authenticated"),
    )
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user = User::find_by_id(&state.dbpool, user.id)
        .await?
        .ok_or_else(|| AppError::Credential("user no longer exists".to_string()))?;

    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct ExchangeParams {
    pub token: String,
}

/// Pops a handoff entry. One-time: a replay of the same token finds nothing.
#[utoipa::path(
    get,
    context_path = "/api/v1/auth",
    path = "/exchange",
    operation_id = "auth_exchange",
    tag = "auth_endpoints",

    params(("token" = String, Query, description = "One-time handoff token from the OAuth callback redirect")),
    responses(
        (status = 200, description = "Session material for the logged-in user", body = ExchangeResponse),
        (status = 401, description = "Unknown, expired, or already-used handoff token"),
    )
)]
pub async fn exchange(
    State(state): State<AppState>,
    Query(params): Query<ExchangeParams>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state
        .handoff
        .take(&params.token)
        .await
        .ok_or_else(|| AppError::Credential("unknown or expired handoff token".to_string()))?;

    Ok(Json(ExchangeResponse {
        token: entry.token,
        user: entry.user,
        api_key: entry.api_key,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GithubLoginParams {
    /// Optional deep-link target, carried through the provider round-trip.
    pub redirect: Option<String>,
}

/// Starts the GitHub login: redirects to the provider's authorize page with
/// the deep-link target base64url-encoded into the state parameter.
#[utoipa::path(
    get,
    context_path = "/api/v1/auth",
    path = "/github/login",
    operation_id = "auth_github_login",
    tag = "auth_endpoints",

    params(("redirect" = Option<String>, Query, description = "Deep-link target to return to after login")),
    responses(
        (status = 303, description = "Redirect to the provider"),
        (status = 503, description = "GitHub login not configured"),
    )
)]
pub async fn github_login(
    State(state): State<AppState>,
    Query(params): Query<GithubLoginParams>,
) -> Result<impl IntoResponse, AppError> {
    if !state.config.github.enabled() {
        return Err(AppError::Unavailable(
            "GitHub login is not configured".to_string(),
        ));
    }

    let login_state = params
        .redirect
        .map(|target| general_purpose::URL_SAFE_NO_PAD.encode(target))
        .unwrap_or_default();

    Ok(Redirect::to(&orchestrator::github_login_url(
        &state,
        &login_state,
    )))
}

#[derive(Debug, Deserialize)]
pub struct GithubCallbackParams {
    pub code: String,
    pub state: Option<String>,
}

/// Completes the GitHub login and bounces the browser to the front-end with
/// a one-time handoff token.
#[utoipa::path(
    get,
    context_path = "/api/v1/auth",
    path = "/github/callback",
    operation_id = "auth_github_callback",
    tag = "auth_endpoints",

    params(
        ("code" = String, Query, description = "Authorization code from the provider"),
        ("state" = Option<String>, Query, description = "Base64url deep-link target from the login start"),
    ),
    responses(
        (status = 303, description = "Redirect to the front-end callback with ?token="),
        (status = 500, description = "Provider exchange failed"),
        (status = 503, description = "GitHub login not configured"),
    )
)]
pub async fn github_callback(
    State(state): State<AppState>,
    Query(params): Query<GithubCallbackParams>,
) -> Result<impl IntoResponse, AppError> {
    if !state.config.github.enabled() {
        return Err(AppError::Unavailable(
            "GitHub login is not configured".to_string(),
        ));
    }

    let handoff = orchestrator::github_callback(&state, &params.code).await?;

    let target = params
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .and_then(decode_login_state)
        .unwrap_or_else(|| state.config.github.frontend_callback_url.clone());

    let separator = if target.contains('?') { '&' } else { '?' };
    Ok(Redirect::to(&format!("{target}{separator}token={handoff}")))
}

/// Decodes the base64url state parameter back into a deep-link target,
/// refusing anything that is not an acceptable redirect.
fn decode_login_state(encoded: &str) -> Option<String> {
    let bytes = general_purpose::URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let target = String::from_utf8(bytes).ok()?;

    validate_redirect_uri(&target).ok()?;
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_login_state_roundtrip() {
        let target = "https://app.example/deep/link?x=1";
        let encoded = general_purpose::URL_SAFE_NO_PAD.encode(target);

        assert_eq!(decode_login_state(&encoded).as_deref(), Some(target));
    }

    #[test]
    fn test_decode_login_state_rejects_plain_http() {
        let encoded = general_purpose::URL_SAFE_NO_PAD.encode("http://evil.example/phish");
        assert!(decode_login_state(&encoded).is_none());
    }

    #[test]
    fn test_decode_login_state_rejects_garbage() {
        assert!(decode_login_state("!!!not-base64!!!").is_none());
        assert!(decode_login_state("").is_none());
    }
}
