//! Per-user progress endpoints
//!
//! Any authenticated user, always scoped to their own rows. The handler
//! derives the user id from the bearer, so cross-tenant access is not
//! expressible through this surface.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::models::entity::{EntityKind, GameEntity};
use crate::models::progress::{Progress, ProgressUpdate};
use crate::models::user::AuthUser;
use crate::state::AppState;

/// Lists the caller's progress for one entity kind.
#[utoipa::path(
    get,
    context_path = "/api/v1",
    path = "/progress/{entity}",
    operation_id = "progress_list",
    tag = "progress_endpoints",
    security(("bearer_auth" = [])),

    params(("entity" = String, Path, description = "Entity kind", example = "quests")),
    responses(
        (status = 200, description = "The caller's progress rows", body = [Progress]),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Unknown entity kind"),
    )
)]
pub async fn progress_list(
    State(state): State<AppState>,
    user: AuthUser,
    Path(entity): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let kind = EntityKind::from_path(&entity)?;

    let rows = Progress::list_for_user(&state.dbpool, user.id, kind).await?;

    Ok(Json(rows))
}

/// Creates or updates the caller's progress on one entity.
#[utoipa::path(
    put,
    context_path = "/api/v1",
    path = "/progress/{entity}",
    operation_id = "progress_update",
    tag = "progress_endpoints",
    security(("bearer_auth" = [])),

    params(("entity" = String, Path, description = "Entity kind", example = "quests")),
    request_body = ProgressUpdate,
    responses(
        (status = 200, description = "The stored progress row", body = Progress),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Unknown entity kind or entity id"),
    )
)]
pub async fn progress_update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(entity): Path<String>,
    Json(update): Json<ProgressUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let kind = EntityKind::from_path(&entity)?;

    // Progress against an entity that does not exist is a client error.
    GameEntity::find_by_id(&state.dbpool, kind, update.entity_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("no {entity} entity with id {}", update.entity_id))
        })?;

    let row = Progress::upsert(&state.dbpool, user.id, kind, &update).await?;

    Ok(Json(row))
}
