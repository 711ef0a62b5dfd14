//! Administrative endpoints
//!
//! API-key management, sync control, token revocation, audit queries, and
//! role changes. The whole router group sits behind the admin middleware;
//! handlers read the authenticated admin from request extensions when they
//! need an owner default.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::orchestrator::invalidate_credential_caches;
use crate::auth::ApiKeyService;
use crate::error::AppError;
use crate::ingest::SyncSummary;
use crate::models::audit::AuditEvent;
use crate::models::credentials::{ApiKey, JwtRecord};
use crate::models::user::{AuthUser, RoleUpdateRequest, User};
use crate::state::AppState;

/// API-key creation request. Without `user_id` the key belongs to the
/// calling admin.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApiKeyCreateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub user_id: Option<i64>,
}

/// API-key creation response: the one and only time the key is visible.
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct ApiKeyCreateResponse {
    pub id: i64,
    pub name: String,
    pub api_key: String,
}

/// Issues a named API key.
#[utoipa::path(
    post,
    context_path = "/api/v1/admin",
    path = "/api-keys",
    operation_id = "admin_api_key_create",
    tag = "administration_endpoints",
    security(("bearer_auth" = [])),

    request_body = ApiKeyCreateRequest,
    responses(
        (status = 201, description = "Key issued; the plain key appears only in this response", body = ApiKeyCreateResponse),
        (status = 400, description = "Invalid name"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Target user does not exist"),
    )
)]
pub async fn api_key_create(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(request): Json<ApiKeyCreateRequest>,
) -> Result<impl IntoResponse, AppError> {
    request
        .validate()
        .map_err(|_| AppError::Input("key name must be 1-100 characters".to_string()))?;

    let owner_id = request.user_id.unwrap_or(admin.id);
    User::find_by_id(&state.dbpool, owner_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no user with id {owner_id}")))?;

    let (record, plain) = ApiKeyService::issue(&state.dbpool, owner_id, &request.name).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyCreateResponse {
            id: record.id,
            name: record.name,
            api_key: plain,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ApiKeyListParams {
    pub user_id: Option<i64>,
}

/// Lists active keys for one user (the calling admin by default).
#[utoipa::path(
    get,
    context_path = "/api/v1/admin",
    path = "/api-keys",
    operation_id = "admin_api_key_list",
    tag = "administration_endpoints",
    security(("bearer_auth" = [])),

    params(("user_id" = Option<i64>, Query, description = "Key owner; defaults to the caller")),
    responses(
        (status = 200, description = "Active keys, hashes omitted", body = [ApiKey]),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
    )
)]
pub async fn api_key_list(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Query(params): Query<ApiKeyListParams>,
) -> Result<impl IntoResponse, AppError> {
    let owner_id = params.user_id.unwrap_or(admin.id);
    let keys = ApiKey::find_active_by_user_id(&state.dbpool, owner_id).await?;

    Ok(Json(keys))
}

/// Revokes an API key. Revocation is permanent and clears the verification
/// caches so the key dies immediately.
#[utoipa::path(
    delete,
    context_path = "/api/v1/admin",
    path = "/api-keys/{id}",
    operation_id = "admin_api_key_revoke",
    tag = "administration_endpoints",
    security(("bearer_auth" = [])),

    params(("id" = i64, Path, description = "Key id", example = 1)),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "No active key with that id"),
    )
)]
pub async fn api_key_revoke(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    ApiKeyService::revoke(&state.dbpool, state.cache.as_ref(), id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SyncTriggerParams {
    /// Clears a stuck running flag before starting.
    #[serde(default)]
    pub force: bool,
}

/// Triggers a sync run. Conflicts when one is already running unless forced.
#[utoipa::path(
    post,
    context_path = "/api/v1/admin",
    path = "/sync",
    operation_id = "admin_sync_trigger",
    tag = "administration_endpoints",
    security(("bearer_auth" = [])),

    params(("force" = Option<bool>, Query, description = "Override the running flag")),
    responses(
        (status = 200, description = "Sync completed", body = SyncSummary),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 409, description = "A sync is already running"),
    )
)]
pub async fn sync_trigger(
    State(state): State<AppState>,
    Query(params): Query<SyncTriggerParams>,
) -> Result<impl IntoResponse, AppError> {
    let summary = if params.force {
        state.sync.force_sync().await?
    } else {
        state.sync.run().await?
    };

    Ok(Json(summary))
}

/// Sync status snapshot.
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct SyncStatusResponse {
    pub running: bool,
}

#[utoipa::path(
    get,
    context_path = "/api/v1/admin",
    path = "/sync/status",
    operation_id = "admin_sync_status",
    tag = "administration_endpoints",
    security(("bearer_auth" = [])),

    responses(
        (status = 200, description = "Whether a sync run is active", body = SyncStatusResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
    )
)]
pub async fn sync_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(SyncStatusResponse {
        running: state.sync.is_running(),
    })
}

/// Revokes one issued JWT by its record id and clears the verification
/// caches. Requires the record id - raw token text is never accepted here.
#[utoipa::path(
    post,
    context_path = "/api/v1/admin",
    path = "/tokens/{id}/revoke",
    operation_id = "admin_token_revoke",
    tag = "administration_endpoints",
    security(("bearer_auth" = [])),

    params(("id" = i64, Path, description = "JWT record id", example = 1)),
    responses(
        (status = 204, description = "Token revoked"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "No active token record with that id"),
    )
)]
pub async fn token_revoke(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let affected = JwtRecord::revoke(&state.dbpool, id).await?;
    if affected == 0 {
        return Err(AppError::NotFound(format!(
            "no active token record with id {id}"
        )));
    }

    invalidate_credential_caches(state.cache.as_ref()).await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AuditWindowParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Audit events inside a time window (default: the last 24 hours).
#[utoipa::path(
    get,
    context_path = "/api/v1/admin",
    path = "/audit",
    operation_id = "admin_audit_window",
    tag = "administration_endpoints",
    security(("bearer_auth" = [])),

    params(
        ("from" = Option<String>, Query, description = "Window start, RFC 3339"),
        ("to" = Option<String>, Query, description = "Window end, RFC 3339"),
    ),
    responses(
        (status = 200, description = "Audit events, newest first", body = [AuditEvent]),
        (status = 400, description = "Window end precedes start"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
    )
)]
pub async fn audit_window(
    State(state): State<AppState>,
    Query(params): Query<AuditWindowParams>,
) -> Result<impl IntoResponse, AppError> {
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or_else(|| to - Duration::hours(24));

    if to < from {
        return Err(AppError::Input(
            "audit window end precedes its start".to_string(),
        ));
    }

    let events = AuditEvent::find_window(&state.dbpool, from, to).await?;

    Ok(Json(events))
}

/// Changes a user's role and clears the credential caches so existing
/// bearers pick up the new role on their next verification.
#[utoipa::path(
    put,
    context_path = "/api/v1/admin",
    path = "/users/{id}/role",
    operation_id = "admin_user_role_update",
    tag = "administration_endpoints",
    security(("bearer_auth" = [])),

    params(("id" = i64, Path, description = "User id", example = 1)),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "No such user"),
    )
)]
pub async fn user_role_update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RoleUpdateRequest>,
) -> Result<impl IntoResponse, AppError> {
    User::find_by_id(&state.dbpool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no user with id {id}")))?;

    let user = User::update_role(&state.dbpool, id, request.role).await?;

    invalidate_credential_caches(state.cache.as_ref()).await;

    Ok(Json(user))
}
