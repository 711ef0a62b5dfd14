//! API-key and bearer authentication, end to end
//!
//! Covers the issue-login-use-revoke lifecycle: an admin mints a key, the
//! key logs in for a JWT, the JWT reads data, and revocation kills the key
//! immediately despite the verification cache.

mod helpers;

use axum::http::{Method, StatusCode};
use serde_json::json;

use helpers::{admin_with_token, spawn_app, user_with_token};

#[tokio::test]
async fn test_api_key_lifecycle() {
    let app = spawn_app().await;
    let (_, admin_token) = admin_with_token(&app.state).await;

    // Admin mints a key for themselves.
    let response = app
        .server
        .post("/api/v1/admin/api-keys")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .json(&json!({"name": "t"}))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: serde_json::Value = response.json();
    let api_key = body["api_key"].as_str().expect("plain key").to_string();
    let key_id = body["id"].as_i64().expect("key id");
    assert_eq!(body["name"], "t");

    // The key logs in for a JWT.
    let response = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"api_key": api_key}))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let token = body["token"].as_str().expect("jwt").to_string();
    assert!(body["expires_in"].as_i64().unwrap() > 0);
    assert_eq!(body["user"]["role"], "admin");

    // The JWT reads data.
    let response = app
        .server
        .get("/api/v1/items")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    response.assert_status_ok();

    // Revocation kills the key for subsequent logins.
    let response = app
        .server
        .delete(&format!("/api/v1/admin/api-keys/{key_id}"))
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    let response = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"api_key": api_key}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_with_unknown_key() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"api_key": "definitely-not-a-valid-api-key-material"}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = response.json();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_reads_require_a_bearer() {
    let app = spawn_app().await;

    let response = app.server.get("/api/v1/items").await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .get("/api/v1/items")
        .add_header("authorization", "Bearer not.a.token")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_returns_the_caller() {
    let app = spawn_app().await;
    let (user, token) = user_with_token(&app.state).await;

    let response = app
        .server
        .get("/api/v1/auth/me")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], user.id);
    assert_eq!(body["email"], "user@example.com");
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn test_writes_require_admin() {
    let app = spawn_app().await;
    let (_, user_token) = user_with_token(&app.state).await;

    let response = app
        .server
        .post("/api/v1/items")
        .add_header("authorization", format!("Bearer {user_token}"))
        .json(&json!({"external_id": "itm_test", "name": "Test Item"}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    // Admin surface is closed to regular users outright.
    let response = app
        .server
        .get("/api/v1/admin/sync/status")
        .add_header("authorization", format!("Bearer {user_token}"))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_preflight_short_circuits_for_allowed_origin() {
    let app = spawn_app().await;

    // The default test config allows http://localhost:5173.
    let response = app
        .server
        .method(Method::OPTIONS, "/api/v1/items")
        .add_header("origin", "http://localhost:5173")
        .add_header("access-control-request-method", "GET")
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    let headers = response.headers();
    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "http://localhost:5173"
    );
    assert!(headers.get("access-control-allow-methods").is_some());
    assert!(headers.get("access-control-allow-headers").is_some());
}

#[tokio::test]
async fn test_preflight_rejects_unknown_origin() {
    let app = spawn_app().await;

    let response = app
        .server
        .method(Method::OPTIONS, "/api/v1/items")
        .add_header("origin", "https://evil.example")
        .add_header("access-control-request-method", "GET")
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let body: serde_json::Value = response.json();
    assert!(body["error"].is_string());
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}

#[tokio::test]
async fn test_cross_origin_response_grant() {
    let app = spawn_app().await;
    let (_, token) = user_with_token(&app.state).await;

    // Allowed origin: the response carries the grant.
    let response = app
        .server
        .get("/api/v1/items")
        .add_header("authorization", format!("Bearer {token}"))
        .add_header("origin", "http://localhost:5173")
        .await;
    response.assert_status_ok();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "http://localhost:5173"
    );

    // Unknown origin: the request is served but never granted.
    let response = app
        .server
        .get("/api/v1/items")
        .add_header("authorization", format!("Bearer {token}"))
        .add_header("origin", "https://elsewhere.example")
        .await;
    response.assert_status_ok();
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}

#[tokio::test]
async fn test_security_headers_present() {
    let app = spawn_app().await;

    let response = app.server.get("/health").await;
    response.assert_status_ok();

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(
        headers.get("referrer-policy").unwrap(),
        "strict-origin-when-cross-origin"
    );
    assert_eq!(
        headers.get("strict-transport-security").unwrap(),
        "max-age=31536000; includeSubDomains"
    );
    assert!(headers.get("content-security-policy").is_some());
}
