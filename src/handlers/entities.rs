//! Game-data entity endpoints
//!
//! Read access for any authenticated caller, writes for admins. The entity
//! kind arrives as a path segment (`/api/v1/skill-nodes/7`); items and
//! quests serve their listings through the read-through cache, everything
//! else reads the store directly. Writes to the cached collections
//! invalidate them.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::RequireAdmin;
use crate::datacache::slice_page;
use crate::error::AppError;
use crate::ingest::required::{required_items, RequiredItem};
use crate::models::entity::{EntityDraft, EntityKind, GameEntity};
use crate::models::user::AuthUser;
use crate::state::AppState;

/// Default page size for listings.
const DEFAULT_LIMIT: i64 = 50;

/// Upper bound on requested page size.
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl ListParams {
    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Paginated entity listing.
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct EntityListResponse {
    pub data: Vec<GameEntity>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

/// Lists entities of one kind, ordered by internal id.
#[utoipa::path(
    get,
    context_path = "/api/v1",
    path = "/{entity}",
    operation_id = "entity_list",
    tag = "data_endpoints",
    security(("bearer_auth" = [])),

    params(
        ("entity" = String, Path, description = "Entity kind, e.g. quests, items, skill-nodes, hideout-modules", example = "items"),
        ("offset" = Option<i64>, Query, description = "Rows to skip"),
        ("limit" = Option<i64>, Query, description = "Page size, capped at 200"),
    ),
    responses(
        (status = 200, description = "One page of entities with the total count", body = EntityListResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Unknown entity kind"),
    )
)]
pub async fn entity_list(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(entity): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let kind = EntityKind::from_path(&entity)?;
    let offset = params.offset();
    let limit = params.limit();

    let (data, total) = match kind {
        EntityKind::Item => state.data_cache.get_items(offset, limit).await?,
        EntityKind::Quest => {
            let all = state.data_cache.get_quests().await?;
            let total = all.len() as i64;
            (slice_page(all, offset, limit), total)
        }
        other => GameEntity::find_all(&state.dbpool, other, offset, limit).await?,
    };

    Ok(Json(EntityListResponse {
        data,
        total,
        offset,
        limit,
    }))
}

/// Reads one entity by internal id.
#[utoipa::path(
    get,
    context_path = "/api/v1",
    path = "/{entity}/{id}",
    operation_id = "entity_read",
    tag = "data_endpoints",
    security(("bearer_auth" = [])),

    params(
        ("entity" = String, Path, description = "Entity kind", example = "quests"),
        ("id" = i64, Path, description = "Internal entity id", example = 1),
    ),
    responses(
        (status = 200, description = "The entity", body = GameEntity),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Unknown kind or id"),
    )
)]
pub async fn entity_read(
    State(state): State<AppState>,
    _user: AuthUser,
    Path((entity, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let kind = EntityKind::from_path(&entity)?;

    let found = GameEntity::find_by_id(&state.dbpool, kind, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no {entity} entity with id {id}")))?;

    Ok(Json(found))
}

/// Creates an entity (admin).
#[utoipa::path(
    post,
    context_path = "/api/v1",
    path = "/{entity}",
    operation_id = "entity_create",
    tag = "data_endpoints",
    security(("bearer_auth" = [])),

    params(("entity" = String, Path, description = "Entity kind", example = "items")),
    request_body = EntityDraft,
    responses(
        (status = 201, description = "Entity created", body = GameEntity),
        (status = 400, description = "Missing external id"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Unknown entity kind"),
    )
)]
pub async fn entity_create(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(entity): Path<String>,
    Json(draft): Json<EntityDraft>,
) -> Result<impl IntoResponse, AppError> {
    let kind = EntityKind::from_path(&entity)?;

    if draft.external_id.is_empty() {
        return Err(AppError::Input("external_id is required".to_string()));
    }

    let created = GameEntity::create(&state.dbpool, kind, &draft).await?;
    invalidate_if_cached(&state, kind).await;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Overwrites an entity (admin).
#[utoipa::path(
    put,
    context_path = "/api/v1",
    path = "/{entity}/{id}",
    operation_id = "entity_update",
    tag = "data_endpoints",
    security(("bearer_auth" = [])),

    params(
        ("entity" = String, Path, description = "Entity kind", example = "items"),
        ("id" = i64, Path, description = "Internal entity id", example = 1),
    ),
    request_body = EntityDraft,
    responses(
        (status = 200, description = "Entity updated", body = GameEntity),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Unknown kind or id"),
    )
)]
pub async fn entity_update(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path((entity, id)): Path<(String, i64)>,
    Json(draft): Json<EntityDraft>,
) -> Result<impl IntoResponse, AppError> {
    let kind = EntityKind::from_path(&entity)?;

    // Make the id miss a 404 instead of an opaque database error.
    GameEntity::find_by_id(&state.dbpool, kind, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no {entity} entity with id {id}")))?;

    let updated = GameEntity::update(&state.dbpool, kind, id, &draft).await?;
    invalidate_if_cached(&state, kind).await;

    Ok(Json(updated))
}

/// Deletes an entity (admin).
#[utoipa::path(
    delete,
    context_path = "/api/v1",
    path = "/{entity}/{id}",
    operation_id = "entity_delete",
    tag = "data_endpoints",
    security(("bearer_auth" = [])),

    params(
        ("entity" = String, Path, description = "Entity kind", example = "items"),
        ("id" = i64, Path, description = "Internal entity id", example = 1),
    ),
    responses(
        (status = 204, description = "Entity deleted"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Unknown kind or id"),
    )
)]
pub async fn entity_delete(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path((entity, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let kind = EntityKind::from_path(&entity)?;

    let deleted = GameEntity::delete(&state.dbpool, kind, id).await?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("no {entity} entity with id {id}")));
    }
    invalidate_if_cached(&state, kind).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Materialized aggregate of every item required by quests and hideout
/// modules, derived at read time from the ingested state.
#[utoipa::path(
    get,
    context_path = "/api/v1",
    path = "/items/required",
    operation_id = "items_required",
    tag = "data_endpoints",
    security(("bearer_auth" = [])),

    responses(
        (status = 200, description = "Aggregate item requirements, ordered by item id", body = [RequiredItem]),
        (status = 401, description = "Not authenticated"),
    )
)]
pub async fn items_required(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let quests = state.data_cache.get_quests().await?;
    let modules = GameEntity::list_all(&state.dbpool, EntityKind::HideoutModule).await?;
    let items = GameEntity::list_all(&state.dbpool, EntityKind::Item).await?;

    Ok(Json(required_items(&quests, &modules, &items)))
}

async fn invalidate_if_cached(state: &AppState, kind: EntityKind) {
    match kind {
        EntityKind::Item => state.data_cache.invalidate_items().await,
        EntityKind::Quest => state.data_cache.invalidate_quests().await,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_defaults_and_clamping() {
        let params = ListParams {
            offset: None,
            limit: None,
        };
        assert_eq!(params.offset(), 0);
        assert_eq!(params.limit(), DEFAULT_LIMIT);

        let params = ListParams {
            offset: Some(-5),
            limit: Some(10_000),
        };
        assert_eq!(params.offset(), 0);
        assert_eq!(params.limit(), MAX_LIMIT);

        let params = ListParams {
            offset: Some(30),
            limit: Some(0),
        };
        assert_eq!(params.offset(), 30);
        assert_eq!(params.limit(), 1);
    }
}
