//! Data, progress, required-items, and admin surfaces end to end

mod helpers;

use axum::http::StatusCode;
use serde_json::json;

use helpers::{admin_with_token, spawn_app, user_with_token};

#[tokio::test]
async fn test_entity_crud_roundtrip() {
    let app = spawn_app().await;
    let (_, admin_token) = admin_with_token(&app.state).await;

    // Create.
    let response = app
        .server
        .post("/api/v1/items")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .json(&json!({"external_id": "itm_bolt", "name": "Bolt", "category": "parts"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let created: serde_json::Value = response.json();
    let id = created["id"].as_i64().unwrap();

    // Read.
    let response = app
        .server
        .get(&format!("/api/v1/items/{id}"))
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await;
    response.assert_status_ok();
    let fetched: serde_json::Value = response.json();
    assert_eq!(fetched["external_id"], "itm_bolt");
    assert_eq!(fetched["category"], "parts");

    // Update.
    let response = app
        .server
        .put(&format!("/api/v1/items/{id}"))
        .add_header("authorization", format!("Bearer {admin_token}"))
        .json(&json!({"external_id": "itm_bolt", "name": "Heavy Bolt"}))
        .await;
    response.assert_status_ok();
    let updated: serde_json::Value = response.json();
    assert_eq!(updated["name"], "Heavy Bolt");
    assert_eq!(updated["id"], id);

    // List sees it.
    let response = app
        .server
        .get("/api/v1/items")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await;
    response.assert_status_ok();
    let listing: serde_json::Value = response.json();
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["data"][0]["name"], "Heavy Bolt");

    // Delete.
    let response = app
        .server
        .delete(&format!("/api/v1/items/{id}"))
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    let response = app
        .server
        .get(&format!("/api/v1/items/{id}"))
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_entity_kind_is_404() {
    let app = spawn_app().await;
    let (_, token) = user_with_token(&app.state).await;

    let response = app
        .server
        .get("/api/v1/words")
        .add_header("authorization", format!("Bearer {token}"))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_required_items_aggregate() {
    let app = spawn_app().await;
    let (_, admin_token) = admin_with_token(&app.state).await;

    // Seed an item and a quest that needs it, through the write surface.
    app.server
        .post("/api/v1/items")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .json(&json!({"external_id": "itm_cell", "name": "Power Cell"}))
        .await
        .assert_status(StatusCode::CREATED);

    app.server
        .post("/api/v1/quests")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .json(&json!({
            "external_id": "q_supply",
            "name": "Supply Run",
            "objectives": {"objectives": [
                {"itemId": "itm_cell", "quantity": 2},
                "Collect 3 power cells for Celeste"
            ]}
        }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = app
        .server
        .get("/api/v1/items/required")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    let aggregate = body.as_array().expect("array");
    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate[0]["item_id"], "itm_cell");
    assert_eq!(aggregate[0]["name"], "Power Cell");
    // Structured (2) and free-text (3) merge additively for the same quest.
    assert_eq!(aggregate[0]["total_quantity"], 5);
}

#[tokio::test]
async fn test_progress_is_scoped_to_the_caller() {
    let app = spawn_app().await;
    let (_, admin_token) = admin_with_token(&app.state).await;
    let (_, user_token) = user_with_token(&app.state).await;

    // Seed a quest to track.
    let response = app
        .server
        .post("/api/v1/quests")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .json(&json!({"external_id": "q1", "name": "First Light"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let quest: serde_json::Value = response.json();
    let quest_id = quest["id"].as_i64().unwrap();

    // The user records progress.
    let response = app
        .server
        .put("/api/v1/progress/quests")
        .add_header("authorization", format!("Bearer {user_token}"))
        .json(&json!({"entity_id": quest_id, "completed": true}))
        .await;
    response.assert_status_ok();

    // Re-recording overwrites rather than duplicating.
    let response = app
        .server
        .put("/api/v1/progress/quests")
        .add_header("authorization", format!("Bearer {user_token}"))
        .json(&json!({"entity_id": quest_id, "completed": false, "level": 2}))
        .await;
    response.assert_status_ok();

    let response = app
        .server
        .get("/api/v1/progress/quests")
        .add_header("authorization", format!("Bearer {user_token}"))
        .await;
    response.assert_status_ok();
    let rows: serde_json::Value = response.json();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["completed"], false);
    assert_eq!(rows[0]["level"], 2);

    // The admin sees their own (empty) progress, not the user's.
    let response = app
        .server
        .get("/api/v1/progress/quests")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await;
    response.assert_status_ok();
    let rows: serde_json::Value = response.json();
    assert!(rows.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_progress_rejects_unknown_entity() {
    let app = spawn_app().await;
    let (_, user_token) = user_with_token(&app.state).await;

    let response = app
        .server
        .put("/api/v1/progress/quests")
        .add_header("authorization", format!("Bearer {user_token}"))
        .json(&json!({"entity_id": 424242, "completed": true}))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_role_change_takes_effect_for_new_verifications() {
    let app = spawn_app().await;
    let (_, admin_token) = admin_with_token(&app.state).await;
    let (user, user_token) = user_with_token(&app.state).await;

    // The regular user cannot write.
    app.server
        .post("/api/v1/items")
        .add_header("authorization", format!("Bearer {user_token}"))
        .json(&json!({"external_id": "x"}))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Promote them; the credential caches are cleared by the handler.
    let response = app
        .server
        .put(&format!("/api/v1/admin/users/{}/role", user.id))
        .add_header("authorization", format!("Bearer {admin_token}"))
        .json(&json!({"role": "admin"}))
        .await;
    response.assert_status_ok();

    // The same bearer now verifies against the updated row.
    app.server
        .post("/api/v1/items")
        .add_header("authorization", format!("Bearer {user_token}"))
        .json(&json!({"external_id": "itm_after_promo", "name": "After"}))
        .await
        .assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_audit_window_records_requests() {
    let app = spawn_app().await;
    let (_, admin_token) = admin_with_token(&app.state).await;

    // Generate some traffic.
    app.server
        .get("/api/v1/items")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await
        .assert_status_ok();

    // The audit insert is spawned off the response path; give it a beat.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let response = app
        .server
        .get("/api/v1/admin/audit")
        .add_header("authorization", format!("Bearer {admin_token}"))
        .await;
    response.assert_status_ok();

    let events: serde_json::Value = response.json();
    let events = events.as_array().unwrap();
    assert!(
        events
            .iter()
            .any(|e| e["endpoint"] == "/api/v1/items" && e["method"] == "GET"),
        "expected the items read in the audit log, got {events:?}"
    );
}

#[tokio::test]
async fn test_handoff_exchange_is_one_time() {
    let app = spawn_app().await;
    let (user, token) = user_with_token(&app.state).await;

    let handoff = app
        .state
        .handoff
        .insert(token, user.clone(), Some("fresh-key".to_string()))
        .await
        .unwrap();

    let response = app
        .server
        .get(&format!("/api/v1/auth/exchange?token={handoff}"))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["user"]["id"], user.id);
    assert_eq!(body["api_key"], "fresh-key");
    assert!(body["token"].as_str().is_some());

    // Second exchange finds nothing.
    let response = app
        .server
        .get(&format!("/api/v1/auth/exchange?token={handoff}"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}
