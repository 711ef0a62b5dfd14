//! Per-user progress against game entities
//!
//! One row per (user, entity kind, entity). Users only ever read and write
//! their own rows; the uniqueness constraint makes updates upserts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::models::entity::EntityKind;

/// Progress state for one user on one entity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Progress {
    pub id: i64,
    pub user_id: i64,
    pub entity_kind: String,
    pub entity_id: i64,
    pub completed: bool,
    pub level: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Progress update payload.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ProgressUpdate {
    pub entity_id: i64,
    #[serde(default)]
    pub completed: bool,
    pub level: Option<i64>,
}

impl Progress {
    /// All progress rows a user holds for one entity kind.
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: i64,
        kind: EntityKind,
    ) -> Result<Vec<Self>, AppError> {
        sqlx::query_as(
            "SELECT * FROM progress WHERE user_id = $1 AND entity_kind = $2 ORDER BY entity_id",
        )
        .bind(user_id)
        .bind(kind.to_string())
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Creates or overwrites the user's progress row for one entity.
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: i64,
        kind: EntityKind,
        update: &ProgressUpdate,
    ) -> Result<Self, AppError> {
        sqlx::query_as(
            "INSERT INTO progress (user_id, entity_kind, entity_id, completed, level) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, entity_kind, entity_id) \
             DO UPDATE SET completed = excluded.completed, level = excluded.level, \
             updated_at = $6 \
             RETURNING *",
        )
        .bind(user_id)
        .bind(kind.to_string())
        .bind(update.entity_id)
        .bind(update.completed)
        .bind(update.level)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}
