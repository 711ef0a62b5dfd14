//! Federated identity synchronization into the local user table

mod helpers;

use arcdata_api::auth::orchestrator::{sync_federated, sync_github};
use arcdata_api::auth::OidcClaims;
use arcdata_api::models::user::Role;
use helpers::spawn_app;

fn claims(email: &str, username: Option<&str>, groups: &[&str]) -> OidcClaims {
    OidcClaims {
        subject: Some(format!("sub-{email}")),
        email: email.to_string(),
        preferred_username: username.map(|u| u.to_string()),
        name: None,
        groups: groups.iter().map(|g| g.to_string()).collect(),
        issuer: "https://id.example".to_string(),
        audience: "arcdata".to_string(),
    }
}

#[tokio::test]
async fn test_first_login_creates_user() {
    let app = spawn_app().await;

    let user = sync_federated(&app.state.dbpool, &claims("a@x", Some("a"), &[]), "arcdb-admins")
        .await
        .unwrap();

    assert_eq!(user.email, "a@x");
    assert_eq!(user.username, "a");
    assert_eq!(user.role, Role::User);
    assert_eq!(user.oidc_sub.as_deref(), Some("sub-a@x"));
}

#[tokio::test]
async fn test_admin_group_grants_admin() {
    let app = spawn_app().await;

    let user = sync_federated(
        &app.state.dbpool,
        &claims("a@x", Some("a"), &["some-team", "arcdb-admins"]),
        "arcdb-admins",
    )
    .await
    .unwrap();

    assert_eq!(user.role, Role::Admin);
}

#[tokio::test]
async fn test_repeat_login_finds_same_user_and_promotes() {
    let app = spawn_app().await;

    let created = sync_federated(&app.state.dbpool, &claims("a@x", Some("a"), &[]), "arcdb-admins")
        .await
        .unwrap();
    assert_eq!(created.role, Role::User);

    // Later login arrives with the admin group: same user, promoted.
    let promoted = sync_federated(
        &app.state.dbpool,
        &claims("a@x", Some("a"), &["arcdb-admins"]),
        "arcdb-admins",
    )
    .await
    .unwrap();
    assert_eq!(promoted.id, created.id);
    assert_eq!(promoted.role, Role::Admin);

    // Absence of the group never demotes.
    let unchanged = sync_federated(&app.state.dbpool, &claims("a@x", Some("a"), &[]), "arcdb-admins")
        .await
        .unwrap();
    assert_eq!(unchanged.role, Role::Admin);
}

#[tokio::test]
async fn test_username_falls_back_to_email_local_part() {
    let app = spawn_app().await;

    let user = sync_federated(&app.state.dbpool, &claims("solo@x.example", None, &[]), "arcdb-admins")
        .await
        .unwrap();

    assert_eq!(user.username, "solo");
}

#[tokio::test]
async fn test_email_match_attaches_provider_id() {
    let app = spawn_app().await;

    // User exists from an earlier OIDC login.
    let existing = sync_federated(&app.state.dbpool, &claims("a@x", Some("a"), &[]), "arcdb-admins")
        .await
        .unwrap();

    // The same person arrives through GitHub with a matching email.
    let (linked, created) = sync_github(&app.state.dbpool, "9001", "a-gh", "a@x")
        .await
        .unwrap();

    assert!(!created);
    assert_eq!(linked.id, existing.id);
    assert_eq!(linked.github_id.as_deref(), Some("9001"));
}

#[tokio::test]
async fn test_github_first_login_creates_user() {
    let app = spawn_app().await;

    let (user, created) = sync_github(&app.state.dbpool, "7", "octo", "octo@users.noreply.github.com")
        .await
        .unwrap();

    assert!(created);
    assert_eq!(user.username, "octo");
    assert_eq!(user.github_id.as_deref(), Some("7"));
    assert_eq!(user.role, Role::User);

    // Subsequent logins find the same row by provider id.
    let (again, created) = sync_github(&app.state.dbpool, "7", "octo", "octo@users.noreply.github.com")
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.id, user.id);
}

#[tokio::test]
async fn test_username_conflict_falls_back_to_email() {
    let app = spawn_app().await;

    helpers::create_user(&app.state, "first@x", "shared", Role::User).await;

    // A different email claims the same preferred username.
    let user = sync_federated(
        &app.state.dbpool,
        &claims("second@x", Some("shared"), &[]),
        "arcdb-admins",
    )
    .await
    .unwrap();

    assert_eq!(user.email, "second@x");
    assert_eq!(user.username, "second@x");
}
