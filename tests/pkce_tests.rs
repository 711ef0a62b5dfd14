//! PKCE authorization-code flow, end to end
//!
//! The S256 happy path, replay conflicts, verifier mismatches, and the
//! redirect-URI policy.

mod helpers;

use axum::http::StatusCode;
use serde_json::json;

use arcdata_api::auth::base64url_sha256;
use helpers::{spawn_app, user_with_token};

const VERIFIER: &str =
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"; // 64 x 'A'

async fn obtain_code(app: &helpers::TestApp, token: &str, challenge: &str) -> String {
    let response = app
        .server
        .post("/api/v1/auth/authorize")
        .add_header("authorization", format!("Bearer {token}"))
        .json(&json!({
            "code_challenge": challenge,
            "code_challenge_method": "S256",
            "redirect_uri": "https://app.example/x"
        }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body["expires_in"].as_i64().unwrap() <= 60);
    body["code"].as_str().expect("code").to_string()
}

#[tokio::test]
async fn test_pkce_happy_path_and_replay() {
    let app = spawn_app().await;
    let (_, token) = user_with_token(&app.state).await;

    let challenge = base64url_sha256(VERIFIER);
    let code = obtain_code(&app, &token, &challenge).await;

    // Exchange succeeds once.
    let response = app
        .server
        .post("/api/v1/auth/token")
        .json(&json!({
            "code": code,
            "code_verifier": VERIFIER,
            "redirect_uri": "https://app.example/x"
        }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body["token"].as_str().is_some());
    assert!(body["refresh_token"].as_str().is_some());

    // Replaying the same code conflicts.
    let response = app
        .server
        .post("/api/v1/auth/token")
        .json(&json!({
            "code": code,
            "code_verifier": VERIFIER,
            "redirect_uri": "https://app.example/x"
        }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_pkce_wrong_verifier() {
    let app = spawn_app().await;
    let (_, token) = user_with_token(&app.state).await;

    let challenge = base64url_sha256(VERIFIER);
    let code = obtain_code(&app, &token, &challenge).await;

    let wrong = "B".repeat(64);
    let response = app
        .server
        .post("/api/v1/auth/token")
        .json(&json!({
            "code": code,
            "code_verifier": wrong,
            "redirect_uri": "https://app.example/x"
        }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_pkce_verifier_too_short() {
    let app = spawn_app().await;
    let (_, token) = user_with_token(&app.state).await;

    let challenge = base64url_sha256("short");
    let code = obtain_code(&app, &token, &challenge).await;

    let response = app
        .server
        .post("/api/v1/auth/token")
        .json(&json!({
            "code": code,
            "code_verifier": "short",
            "redirect_uri": "https://app.example/x"
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pkce_rejects_plain_http_redirect() {
    let app = spawn_app().await;
    let (_, token) = user_with_token(&app.state).await;

    let response = app
        .server
        .post("/api/v1/auth/authorize")
        .add_header("authorization", format!("Bearer {token}"))
        .json(&json!({
            "code_challenge": base64url_sha256(VERIFIER),
            "code_challenge_method": "S256",
            "redirect_uri": "http://app.example/x"
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    // localhost is the one HTTP exception.
    let response = app
        .server
        .post("/api/v1/auth/authorize")
        .add_header("authorization", format!("Bearer {token}"))
        .json(&json!({
            "code_challenge": base64url_sha256(VERIFIER),
            "code_challenge_method": "S256",
            "redirect_uri": "http://localhost:5173/x"
        }))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_pkce_unknown_code() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/api/v1/auth/token")
        .json(&json!({
            "code": "never-issued-code-material",
            "code_verifier": VERIFIER,
            "redirect_uri": "https://app.example/x"
        }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rotation_is_single_use() {
    let app = spawn_app().await;
    let (_, token) = user_with_token(&app.state).await;

    let challenge = base64url_sha256(VERIFIER);
    let code = obtain_code(&app, &token, &challenge).await;

    let response = app
        .server
        .post("/api/v1/auth/token")
        .json(&json!({
            "code": code,
            "code_verifier": VERIFIER,
            "redirect_uri": "https://app.example/x"
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    // First rotation succeeds and returns a different refresh token.
    let response = app
        .server
        .post("/api/v1/auth/refresh")
        .json(&json!({"refresh_token": refresh}))
        .await;
    response.assert_status_ok();
    let rotated: serde_json::Value = response.json();
    assert_ne!(rotated["refresh_token"].as_str().unwrap(), refresh);

    // The presented token was consumed by the rotation.
    let response = app
        .server
        .post("/api/v1/auth/refresh")
        .json(&json!({"refresh_token": refresh}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    // The replacement works.
    let response = app
        .server
        .post("/api/v1/auth/refresh")
        .json(&json!({
            "refresh_token": rotated["refresh_token"].as_str().unwrap()
        }))
        .await;
    response.assert_status_ok();
}
