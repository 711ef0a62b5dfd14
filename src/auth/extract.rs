//! Request admission extractors and middleware
//!
//! [`AuthUser`] as an extractor is the read-auth admission point: any valid
//! bearer (local or federated) passes. [`RequireAdmin`] gates write access.
//! `admin_auth_middleware` protects whole router subtrees and injects the
//! authenticated user into request extensions for handlers that want it.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use crate::auth::orchestrator::resolve_bearer;
use crate::error::AppError;
use crate::models::user::AuthUser;
use crate::state::AppState;

/// Pulls the bearer token out of the Authorization header.
pub fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let auth_header = parts
        .headers
        .get("Authorization")
        .ok_or_else(|| AppError::Credential("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Credential("malformed Authorization header".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Credential("expected a Bearer token".to_string()))
}

/// Read-auth admission: any valid bearer resolves to a user.
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // A middleware earlier in the chain may already have authenticated.
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let token = bearer_token(parts)?;
        let user = resolve_bearer(state, token).await?;

        Ok(AuthUser::from(user))
    }
}

/// Write-auth admission: a valid bearer whose user holds the admin role.
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AppError::Authorization(
                "admin role required".to_string(),
            ));
        }

        Ok(RequireAdmin(user))
    }
}

/// Router-level admin gate.
///
/// Validates the bearer, requires the admin role, and injects the
/// authenticated user into request extensions before running the inner
/// handler.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();
    let token = bearer_token(&parts)?;
    let user = resolve_bearer(&state, token).await?;

    let auth_user = AuthUser::from(user);
    if !auth_user.is_admin() {
        return Err(AppError::Authorization("admin role required".to_string()));
    }

    parts.extensions.insert(auth_user);
    request = Request::from_parts(parts, body);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(v) = value {
            builder = builder.header("Authorization", v);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn test_bearer_token_extraction() {
        let parts = parts_with_auth(Some("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&parts).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_bearer_token_missing_header() {
        let parts = parts_with_auth(None);
        assert!(bearer_token(&parts).is_err());
    }

    #[test]
    fn test_bearer_token_wrong_scheme() {
        let parts = parts_with_auth(Some("Basic dXNlcjpwYXNz"));
        assert!(bearer_token(&parts).is_err());
    }
}
