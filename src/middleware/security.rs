//! Security headers and CORS middleware implementation
//!
//! Adds the baseline protection headers to every response, assembles a
//! Content-Security-Policy from the configured origins, and enforces those
//! same origins for cross-origin callers: an allowed preflight short-circuits
//! with 204 and the full grant headers, a disallowed one answers 403, and
//! actual cross-origin responses only carry the allow-origin grant when the
//! caller's origin is configured. A separate middleware bounces plain-HTTP
//! traffic arriving behind a proxy, keyed off `X-Forwarded-Proto`.
//!
//! Refer to OWASP for more: <https://cheatsheetseries.owasp.org/cheatsheets/HTTP_Headers_Cheat_Sheet.html>

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::state::AppState;

/// Methods granted to allowed cross-origin callers.
const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// Headers granted to allowed cross-origin callers.
const CORS_ALLOW_HEADERS: &str = "authorization, content-type";

/// How long browsers may cache a preflight grant, in seconds.
const CORS_MAX_AGE: &str = "3600";

/// Builds the CSP value: self plus every configured origin for API calls,
/// images allowed from anywhere over HTTPS for item icons.
pub fn build_csp(origins: &[String]) -> String {
    let connect = if origins.is_empty() {
        "'self'".to_string()
    } else {
        format!("'self' {}", origins.join(" "))
    };

    format!(
        "default-src 'self'; connect-src {connect}; img-src 'self' data: https:; \
         frame-ancestors 'none'"
    )
}

/// Security headers middleware function
///
/// Adds essential security headers to all responses:
/// - X-Content-Type-Options: nosniff
/// - X-Frame-Options: DENY
/// - Referrer-Policy: strict-origin-when-cross-origin
/// - Strict-Transport-Security with a one-year max age
/// - Content-Security-Policy assembled from the allowed origins
pub async fn security_headers(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();

    // Prevent MIME type sniffing
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    // This API never renders in a frame
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));

    // Control referrer information sent when following links
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    if let Ok(csp) = build_csp(&state.config.allowed_origins).parse() {
        headers.insert(header::CONTENT_SECURITY_POLICY, csp);
    }

    response
}

fn origin_allowed(origins: &[String], origin: &str) -> bool {
    origins.iter().any(|allowed| allowed == origin)
}

/// CORS enforcement against the configured origins.
///
/// Preflights never reach the router: an allowed origin gets 204 with the
/// grant headers, anything else gets 403. Non-preflight responses gain the
/// allow-origin grant only for configured origins; same-origin traffic
/// (no Origin header) is untouched.
pub async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if *request.method() == Method::OPTIONS {
        if let Some(origin) = origin {
            if !origin_allowed(&state.config.allowed_origins, &origin) {
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({ "error": "origin not allowed" })),
                )
                    .into_response();
            }

            let mut response = StatusCode::NO_CONTENT.into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&origin) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(CORS_ALLOW_METHODS),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(CORS_ALLOW_HEADERS),
            );
            headers.insert(
                header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(CORS_MAX_AGE),
            );
            headers.insert(header::VARY, HeaderValue::from_static("origin"));
            return response;
        }

        // OPTIONS without an Origin is not a preflight.
        return next.run(request).await;
    }

    let mut response = next.run(request).await;

    if let Some(origin) = origin {
        if origin_allowed(&state.config.allowed_origins, &origin) {
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&origin) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
            headers.insert(header::VARY, HeaderValue::from_static("origin"));
        }
    }

    response
}

/// Redirects plain-HTTP requests to HTTPS when a fronting proxy reports the
/// original scheme. Requests without the header (direct local traffic) pass
/// through untouched.
pub async fn https_redirect(request: Request, next: Next) -> Response {
    let forwarded_proto = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());

    if forwarded_proto == Some("http") {
        if let Some(host) = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
        {
            let location = format!(
                "https://{host}{}",
                request
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/")
            );
            if let Ok(location) = location.parse::<HeaderValue>() {
                return (
                    StatusCode::PERMANENT_REDIRECT,
                    [(header::LOCATION, location)],
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_csp_with_origins() {
        let csp = build_csp(&[
            "https://app.example".to_string(),
            "http://localhost:5173".to_string(),
        ]);

        assert!(csp.contains("connect-src 'self' https://app.example http://localhost:5173"));
        assert!(csp.contains("default-src 'self'"));
        assert!(csp.contains("frame-ancestors 'none'"));
    }

    #[test]
    fn test_build_csp_without_origins() {
        let csp = build_csp(&[]);
        assert!(csp.contains("connect-src 'self';"));
    }

    #[test]
    fn test_origin_allowed_is_exact_match() {
        let origins = vec![
            "https://app.example".to_string(),
            "http://localhost:5173".to_string(),
        ];

        assert!(origin_allowed(&origins, "https://app.example"));
        assert!(origin_allowed(&origins, "http://localhost:5173"));
        assert!(!origin_allowed(&origins, "https://app.example.evil"));
        assert!(!origin_allowed(&origins, "https://app.example/"));
        assert!(!origin_allowed(&origins, "http://localhost:5174"));
    }
}
