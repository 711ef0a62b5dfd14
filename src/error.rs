//! Error handling module
//!
//! Centralizes every failure the API can surface. Each variant of [`AppError`]
//! corresponds to one semantic error kind with a fixed HTTP status, so
//! handlers propagate errors with `?` and never build responses by hand.
//!
//! Database and upstream failures keep their source chain for logging while
//! clients only ever see a `{"error": ...}` JSON body.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-wide error type with one variant per semantic failure kind.
///
/// The mapping to HTTP status codes is fixed:
/// - `Input`, `Policy` - 400
/// - `Credential` - 401
/// - `Authorization` - 403
/// - `NotFound` - 404
/// - `Conflict` - 409
/// - `RateLimited` - 429 (carries the window headers)
/// - `Upstream`, `Storage`, `Migrate`, `Internal` - 500
/// - `Unavailable` - 503
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// Malformed JSON, missing required field, or a constraint violation on
    /// request input (PKCE lengths, pagination bounds).
    #[error("invalid input: {0}")]
    Input(String),

    /// Invalid or expired key, token, or code; signature or issuer/audience
    /// mismatch.
    #[error("invalid credentials: {0}")]
    Credential(String),

    /// Authenticated but not allowed: insufficient role or cross-tenant
    /// access.
    #[error("forbidden: {0}")]
    Authorization(String),

    /// Lookup by id or hash found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// State conflict: sync already running, authorization code already
    /// consumed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Inbound fixed window exceeded. Carries everything needed for the
    /// Retry-After and X-RateLimit-* response headers.
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u64,
        retry_after: u64,
        reset: i64,
    },

    /// Request violates a policy constraint (non-HTTPS redirect URI, origin
    /// not allowed).
    #[error("policy violation: {0}")]
    Policy(String),

    /// Remote fetch, JWKS, or userinfo failure.
    #[error("upstream error: {0}")]
    Upstream(anyhow::Error),

    /// Database failure.
    #[error("database error: {0}")]
    Storage(#[source] sqlx::Error),

    /// Schema migration failure at boot.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Anything else; the catch-all for infrastructure faults.
    #[error("internal error: {0}")]
    Internal(anyhow::Error),

    /// The service cannot currently serve the request (pool exhausted,
    /// readiness failure).
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    /// Convenience constructor for upstream failures with context.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(anyhow::anyhow!(msg.into()))
    }

    /// Convenience constructor for internal failures with context.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(msg.into()))
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Input(_) | AppError::Policy(_) => StatusCode::BAD_REQUEST,
            AppError::Credential(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_)
            | AppError::Storage(_)
            | AppError::Migrate(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Converts errors into the uniform `{"error": ...}` JSON response.
///
/// Server-side variants are logged with their full source chain and surface a
/// generic message to the client; everything else echoes its display string.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // 5xx details stay in the logs, not in the response body.
        let message = match &self {
            AppError::Upstream(e) => {
                tracing::error!(error = %e, "upstream failure");
                "upstream service failure".to_string()
            }
            AppError::Storage(e) => {
                tracing::error!(error = %e, "database failure");
                "internal server error".to_string()
            }
            AppError::Migrate(e) => {
                tracing::error!(error = %e, "migration failure");
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal failure");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();

        if let AppError::RateLimited {
            limit,
            retry_after,
            reset,
        } = self
        {
            let headers = response.headers_mut();
            if let Ok(v) = retry_after.to_string().parse() {
                headers.insert(header::RETRY_AFTER, v);
            }
            if let Ok(v) = limit.to_string().parse() {
                headers.insert("x-ratelimit-limit", v);
            }
            if let Ok(v) = "0".parse() {
                headers.insert("x-ratelimit-remaining", v);
            }
            if let Ok(v) = reset.to_string().parse() {
                headers.insert("x-ratelimit-reset", v);
            }
        }

        response
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record not found".to_string()),
            other => AppError::Storage(other),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Input(format!("malformed JSON: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.into())
    }
}
