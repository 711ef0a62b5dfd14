//! Inbound fixed-window rate limiting over the shared cache

mod helpers;

use axum::http::StatusCode;

use helpers::{spawn_app_with, user_with_token};

#[tokio::test]
async fn test_fixed_window_admits_limit_then_429() {
    let app = spawn_app_with(|config| {
        config.rate_limit.limit = 3;
        config.rate_limit.window_secs = 60;
    })
    .await;
    let (_, token) = user_with_token(&app.state).await;

    for i in 1..=3 {
        let response = app
            .server
            .get("/api/v1/items")
            .add_header("authorization", format!("Bearer {token}"))
            .await;
        response.assert_status_ok();

        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .expect("remaining header");
        assert_eq!(remaining, 3 - i);
        assert_eq!(
            response.headers().get("x-ratelimit-limit").unwrap(),
            "3"
        );
    }

    // Fourth request in the window is refused with the retry headers.
    let response = app
        .server
        .get("/api/v1/items")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);

    let headers = response.headers();
    assert_eq!(headers.get("retry-after").unwrap(), "60");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "3");
    assert!(headers.get("x-ratelimit-reset").is_some());
}

#[tokio::test]
async fn test_windows_are_per_identifier() {
    let app = spawn_app_with(|config| {
        config.rate_limit.limit = 2;
    })
    .await;
    let (_, first_token) = user_with_token(&app.state).await;
    let second = helpers::create_user(
        &app.state,
        "second@example.com",
        "second",
        arcdata_api::models::user::Role::User,
    )
    .await;
    let second_token = helpers::issue_jwt(&app.state, &second).await;

    // First caller exhausts their window.
    for _ in 0..2 {
        app.server
            .get("/api/v1/items")
            .add_header("authorization", format!("Bearer {first_token}"))
            .await
            .assert_status_ok();
    }
    app.server
        .get("/api/v1/items")
        .add_header("authorization", format!("Bearer {first_token}"))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    // The second caller is unaffected.
    app.server
        .get("/api/v1/items")
        .add_header("authorization", format!("Bearer {second_token}"))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_health_bypasses_rate_limit() {
    let app = spawn_app_with(|config| {
        config.rate_limit.limit = 1;
    })
    .await;

    for _ in 0..10 {
        app.server.get("/health").await.assert_status_ok();
        app.server.get("/health/live").await.assert_status_ok();
    }
}

#[tokio::test]
async fn test_limiter_fails_open_without_cache() {
    let app = spawn_app_with(|config| {
        config.cache_url = String::new();
        config.rate_limit.limit = 1;
    })
    .await;
    let (_, token) = user_with_token(&app.state).await;

    // No cache, no counting: everything is admitted.
    for _ in 0..5 {
        app.server
            .get("/api/v1/items")
            .add_header("authorization", format!("Bearer {token}"))
            .await
            .assert_status_ok();
    }
}
