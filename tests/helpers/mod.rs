#![allow(dead_code)] // each suite uses its own subset of these helpers

//! Shared helpers for the integration suites
//!
//! Builds a real application state over a temporary SQLite database and the
//! in-process cache backend, then serves the actual router through
//! axum-test. Users and tokens are minted directly against the library so
//! each suite controls its fixtures.

use axum_test::TestServer;
use tempfile::NamedTempFile;

use arcdata_api::auth::JwtManager;
use arcdata_api::cache::KvCache;
use arcdata_api::config::ApiConfig;
use arcdata_api::models::user::{NewUser, Role, User};
use arcdata_api::routes::create_router;
use arcdata_api::state::AppState;
use arcdata_api::{build_state, init_dbpool};

/// A running test application. Keep the handle alive - dropping it deletes
/// the database file.
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    _db_file: NamedTempFile,
}

/// Builds a test app with the default test configuration.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Builds a test app after letting the caller adjust the configuration.
pub async fn spawn_app_with<F>(customize: F) -> TestApp
where
    F: FnOnce(&mut ApiConfig),
{
    let db_file = NamedTempFile::new().expect("temp database file");
    let db_url = format!("sqlite:{}", db_file.path().display());

    let dbpool = init_dbpool(&db_url).await.expect("database pool");

    let mut config = ApiConfig::default();
    config.database_url = db_url;
    config.cache_url = "memory".to_string();
    config.auth.jwt_secret = "test_secret_key".to_string();
    config.sync.enabled = false;
    customize(&mut config);

    let cache = KvCache::connect(&config.cache_url).await;
    let state = build_state(config, dbpool, cache).await;

    let router = create_router(state.clone()).await;
    let server = TestServer::new(router).expect("test server");

    TestApp {
        server,
        state,
        _db_file: db_file,
    }
}

/// Inserts a user directly into the store.
pub async fn create_user(state: &AppState, email: &str, username: &str, role: Role) -> User {
    User::create(
        &state.dbpool,
        NewUser {
            email,
            username,
            role,
            github_id: None,
            oidc_sub: None,
        },
    )
    .await
    .expect("user insert")
}

/// Issues a real JWT for the user, recording it like the login paths do.
pub async fn issue_jwt(state: &AppState, user: &User) -> String {
    JwtManager::issue(
        &state.dbpool,
        user,
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_expiry_hours,
    )
    .await
    .expect("token issuance")
}

/// An admin plus a bearer for them, the common fixture.
pub async fn admin_with_token(state: &AppState) -> (User, String) {
    let admin = create_user(state, "admin@example.com", "admin", Role::Admin).await;
    let token = issue_jwt(state, &admin).await;
    (admin, token)
}

/// A regular user plus a bearer for them.
pub async fn user_with_token(state: &AppState) -> (User, String) {
    let user = create_user(state, "user@example.com", "user", Role::User).await;
    let token = issue_jwt(state, &user).await;
    (user, token)
}
