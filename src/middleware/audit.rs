//! Request audit middleware
//!
//! Captures endpoint, method, status, latency, best-effort caller identity,
//! client IP, and the JSON body of mutating requests, then persists the
//! event off the response path. Audit persistence never delays or fails a
//! request.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::auth::JwtManager;
use crate::middleware::rate_limit::client_ip;
use crate::models::audit::{AuditEvent, NewAuditEvent};
use crate::state::AppState;

/// Bodies beyond this many bytes are recorded truncated-to-nothing rather
/// than buffered.
const MAX_AUDITED_BODY: usize = 64 * 1024;

fn captures_body(method: &Method) -> bool {
    *method == Method::POST
        || *method == Method::PUT
        || *method == Method::PATCH
        || *method == Method::DELETE
}

/// Audit logging middleware.
pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();

    let method = request.method().clone();
    let endpoint = request.uri().path().to_string();
    let ip = client_ip(&request);

    // Caller identity without a store round-trip: readable local claims only.
    let caller_id = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| JwtManager::decode_claims(token, &state.config.auth.jwt_secret).ok())
        .and_then(|claims| claims.sub.parse::<i64>().ok());

    // Mutating JSON requests get their body captured; the body is rebuilt so
    // the handler still sees it. Bodies past the audit cap (or without a
    // declared length) pass through uncaptured rather than risk truncation.
    let capture = captures_body(&method)
        && is_json(&request)
        && declared_length(&request).is_some_and(|len| len <= MAX_AUDITED_BODY);

    let (request, request_body) = if capture {
        let (parts, body) = request.into_parts();
        match to_bytes(body, MAX_AUDITED_BODY).await {
            Ok(bytes) => {
                let captured = std::str::from_utf8(&bytes).ok().map(|s| s.to_string());
                let request = Request::from_parts(parts, Body::from(bytes));
                (request, captured)
            }
            Err(e) => {
                tracing::warn!(error = %e, "audit body read failed");
                (Request::from_parts(parts, Body::empty()), None)
            }
        }
    } else {
        (request, None)
    };

    let response = next.run(request).await;

    let event = NewAuditEvent {
        endpoint,
        method: method.to_string(),
        status: response.status().as_u16() as i64,
        latency_ms: started.elapsed().as_millis() as i64,
        caller_id,
        ip,
        request_body,
    };

    let pool = state.dbpool.clone();
    tokio::spawn(async move {
        if let Err(e) = AuditEvent::insert(&pool, event).await {
            tracing::warn!(error = %e, "failed to persist audit event");
        }
    });

    response
}

fn declared_length(request: &Request) -> Option<usize> {
    request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn is_json(request: &Request) -> bool {
    request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_body_only_for_mutations() {
        assert!(captures_body(&Method::POST));
        assert!(captures_body(&Method::PUT));
        assert!(captures_body(&Method::DELETE));
        assert!(!captures_body(&Method::GET));
        assert!(!captures_body(&Method::HEAD));
        assert!(!captures_body(&Method::OPTIONS));
    }
}
