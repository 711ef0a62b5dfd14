//! Request size limits middleware implementation
//!
//! Caps mutating request bodies at 1MB before anything else sees them. GET,
//! HEAD, and OPTIONS traffic carries no body worth limiting and passes
//! through untouched. A body over the cap answers 413 whether or not the
//! client declared a Content-Length.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Default request body cap.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024; // 1MB

/// Request-size limiting, first stage of the middleware chain.
pub async fn request_size_limit(request: Request, next: Next) -> Response {
    let method = request.method();
    if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
        return next.run(request).await;
    }

    // An honest Content-Length over the cap is refused without reading.
    if let Some(declared) = declared_length(&request) {
        if declared > DEFAULT_BODY_LIMIT {
            return body_too_large();
        }
    }

    // Otherwise the cap is enforced while buffering; the handler gets the
    // buffered body back.
    let (parts, body) = request.into_parts();
    match to_bytes(body, DEFAULT_BODY_LIMIT).await {
        Ok(bytes) => {
            next.run(Request::from_parts(parts, Body::from(bytes)))
                .await
        }
        Err(_) => body_too_large(),
    }
}

fn declared_length(request: &Request) -> Option<usize> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn body_too_large() -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({ "error": "request body too large" })),
    )
        .into_response()
}
