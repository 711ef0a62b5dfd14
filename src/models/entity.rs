//! Game-data entities and their repository operations
//!
//! Ten entity kinds share one row shape; each kind lives in its own table and
//! the kind enum resolves the table at query time. The stable identity across
//! ingests is `external_id` - the internal surrogate id is preserved on every
//! upsert. Listings order by internal id ascending so pagination is
//! deterministic.
//!
//! `raw` keeps the source record verbatim as JSON; the scalar columns are a
//! typed projection of it and may lag behind additions to the source schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow, SqlitePool};
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;

/// The family of ingested entity kinds. String forms double as URL path
/// segments (`/api/v1/skill-nodes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter)]
pub enum EntityKind {
    #[strum(serialize = "quests")]
    Quest,
    #[strum(serialize = "items")]
    Item,
    #[strum(serialize = "skill-nodes")]
    SkillNode,
    #[strum(serialize = "hideout-modules")]
    HideoutModule,
    #[strum(serialize = "enemy-types")]
    EnemyType,
    #[strum(serialize = "alerts")]
    Alert,
    #[strum(serialize = "traders")]
    Trader,
    #[strum(serialize = "bots")]
    Bot,
    #[strum(serialize = "maps")]
    Map,
    #[strum(serialize = "projects")]
    Project,
}

impl EntityKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Quest => "quests",
            EntityKind::Item => "items",
            EntityKind::SkillNode => "skill_nodes",
            EntityKind::HideoutModule => "hideout_modules",
            EntityKind::EnemyType => "enemy_types",
            EntityKind::Alert => "alerts",
            EntityKind::Trader => "traders",
            EntityKind::Bot => "bots",
            EntityKind::Map => "maps",
            EntityKind::Project => "projects",
        }
    }

    /// Parses a URL path segment, mapping failure to a client error.
    pub fn from_path(segment: &str) -> Result<Self, AppError> {
        Self::from_str(segment)
            .map_err(|_| AppError::NotFound(format!("unknown entity type: {segment}")))
    }

    /// Hideout modules carry legacy duplicate external ids; their listings
    /// collapse to one row per external id (lowest internal id wins).
    fn deduplicates(&self) -> bool {
        matches!(self, EntityKind::HideoutModule)
    }
}

/// A single ingested entity row. Columns that do not apply to the kind are
/// NULL.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct GameEntity {
    pub id: i64,
    pub external_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub trader: Option<String>,
    pub category: Option<String>,
    pub entity_type: Option<String>,
    pub icon_name: Option<String>,
    pub impacted_skill: Option<String>,
    pub xp: Option<i64>,
    pub max_level: Option<i64>,
    pub max_points: Option<i64>,
    #[schema(value_type = Option<Object>)]
    pub objectives: Option<Json<Value>>,
    #[schema(value_type = Option<Object>)]
    pub reward_item_ids: Option<Json<Value>>,
    #[schema(value_type = Option<Object>)]
    pub levels: Option<Json<Value>>,
    #[schema(value_type = Option<Object>)]
    pub position: Option<Json<Value>>,
    #[schema(value_type = Option<Object>)]
    pub prerequisite_node_ids: Option<Json<Value>>,
    #[schema(value_type = Option<Object>)]
    pub known_value: Option<Json<Value>>,
    pub image_url: Option<String>,
    #[schema(value_type = Object)]
    pub raw: Json<Value>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Insert/update payload for an entity: everything except the surrogate id
/// and row timestamps. Built by the ingest decoder and by admin writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EntityDraft {
    pub external_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub trader: Option<String>,
    pub category: Option<String>,
    pub entity_type: Option<String>,
    pub icon_name: Option<String>,
    pub impacted_skill: Option<String>,
    pub xp: Option<i64>,
    pub max_level: Option<i64>,
    pub max_points: Option<i64>,
    #[schema(value_type = Option<Object>)]
    pub objectives: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub reward_item_ids: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub levels: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub position: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub prerequisite_node_ids: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub known_value: Option<Value>,
    pub image_url: Option<String>,
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub raw: Value,
    pub synced_at: Option<DateTime<Utc>>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl GameEntity {
    /// Inserts a new entity row.
    pub async fn create(
        pool: &SqlitePool,
        kind: EntityKind,
        draft: &EntityDraft,
    ) -> Result<Self, AppError> {
        let query = format!(
            "INSERT INTO {} (external_id, name, description, trader, category, entity_type, \
             icon_name, impacted_skill, xp, max_level, max_points, objectives, reward_item_ids, \
             levels, position, prerequisite_node_ids, known_value, image_url, raw, synced_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20) RETURNING *",
            kind.table_name()
        );

        sqlx::query_as(&query)
            .bind(&draft.external_id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(&draft.trader)
            .bind(&draft.category)
            .bind(&draft.entity_type)
            .bind(&draft.icon_name)
            .bind(&draft.impacted_skill)
            .bind(draft.xp)
            .bind(draft.max_level)
            .bind(draft.max_points)
            .bind(draft.objectives.clone().map(Json))
            .bind(draft.reward_item_ids.clone().map(Json))
            .bind(draft.levels.clone().map(Json))
            .bind(draft.position.clone().map(Json))
            .bind(draft.prerequisite_node_ids.clone().map(Json))
            .bind(draft.known_value.clone().map(Json))
            .bind(&draft.image_url)
            .bind(Json(draft.raw.clone()))
            .bind(draft.synced_at)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        kind: EntityKind,
        id: i64,
    ) -> Result<Option<Self>, AppError> {
        let query = format!("SELECT * FROM {} WHERE id = $1", kind.table_name());

        sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Stable-identity lookup. For kinds with legacy duplicates the lowest
    /// internal id is the canonical row.
    pub async fn find_by_external_id(
        pool: &SqlitePool,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let query = format!(
            "SELECT * FROM {} WHERE external_id = $1 ORDER BY id ASC LIMIT 1",
            kind.table_name()
        );

        sqlx::query_as(&query)
            .bind(external_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Paginated listing ordered by internal id, with the total row count.
    pub async fn find_all(
        pool: &SqlitePool,
        kind: EntityKind,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Self>, i64), AppError> {
        let (list_query, count_query) = if kind.deduplicates() {
            (
                format!(
                    "SELECT * FROM {t} WHERE id IN \
                     (SELECT MIN(id) FROM {t} GROUP BY external_id) \
                     ORDER BY id ASC LIMIT $1 OFFSET $2",
                    t = kind.table_name()
                ),
                format!(
                    "SELECT COUNT(DISTINCT external_id) FROM {}",
                    kind.table_name()
                ),
            )
        } else {
            (
                format!(
                    "SELECT * FROM {} ORDER BY id ASC LIMIT $1 OFFSET $2",
                    kind.table_name()
                ),
                format!("SELECT COUNT(*) FROM {}", kind.table_name()),
            )
        };

        let rows = sqlx::query_as(&list_query)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        let total: i64 = sqlx::query_scalar(&count_query).fetch_one(pool).await?;

        Ok((rows, total))
    }

    /// Full unpaged listing, used by the read-through cache refresh.
    pub async fn list_all(pool: &SqlitePool, kind: EntityKind) -> Result<Vec<Self>, AppError> {
        // SQLite treats LIMIT -1 as unbounded.
        let (rows, _) = Self::find_all(pool, kind, 0, -1).await?;
        Ok(rows)
    }

    /// Overwrites every mutable column of an existing row.
    pub async fn update(
        pool: &SqlitePool,
        kind: EntityKind,
        id: i64,
        draft: &EntityDraft,
    ) -> Result<Self, AppError> {
        let query = format!(
            "UPDATE {} SET external_id = $1, name = $2, description = $3, trader = $4, \
             category = $5, entity_type = $6, icon_name = $7, impacted_skill = $8, xp = $9, \
             max_level = $10, max_points = $11, objectives = $12, reward_item_ids = $13, \
             levels = $14, position = $15, prerequisite_node_ids = $16, known_value = $17, \
             image_url = $18, raw = $19, synced_at = $20, updated_at = $21 \
             WHERE id = $22 RETURNING *",
            kind.table_name()
        );

        sqlx::query_as(&query)
            .bind(&draft.external_id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(&draft.trader)
            .bind(&draft.category)
            .bind(&draft.entity_type)
            .bind(&draft.icon_name)
            .bind(&draft.impacted_skill)
            .bind(draft.xp)
            .bind(draft.max_level)
            .bind(draft.max_points)
            .bind(draft.objectives.clone().map(Json))
            .bind(draft.reward_item_ids.clone().map(Json))
            .bind(draft.levels.clone().map(Json))
            .bind(draft.position.clone().map(Json))
            .bind(draft.prerequisite_node_ids.clone().map(Json))
            .bind(draft.known_value.clone().map(Json))
            .bind(&draft.image_url)
            .bind(Json(draft.raw.clone()))
            .bind(draft.synced_at)
            .bind(Utc::now())
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn delete(pool: &SqlitePool, kind: EntityKind, id: i64) -> Result<u64, AppError> {
        let query = format!("DELETE FROM {} WHERE id = $1", kind.table_name());

        let result = sqlx::query(&query).bind(id).execute(pool).await?;

        Ok(result.rows_affected())
    }

    /// Insert-or-update keyed on `external_id`. An existing row keeps its
    /// internal id; every other column is overwritten.
    pub async fn upsert_by_external_id(
        pool: &SqlitePool,
        kind: EntityKind,
        draft: &EntityDraft,
    ) -> Result<Self, AppError> {
        if draft.external_id.is_empty() {
            return Err(AppError::Input(
                "entity is missing an external id".to_string(),
            ));
        }

        match Self::find_by_external_id(pool, kind, &draft.external_id).await? {
            Some(existing) => Self::update(pool, kind, existing.id, draft).await,
            None => Self::create(pool, kind, draft).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_path_segments() {
        assert_eq!(EntityKind::from_path("quests").unwrap(), EntityKind::Quest);
        assert_eq!(
            EntityKind::from_path("skill-nodes").unwrap(),
            EntityKind::SkillNode
        );
        assert_eq!(
            EntityKind::from_path("hideout-modules").unwrap(),
            EntityKind::HideoutModule
        );
        assert!(EntityKind::from_path("words").is_err());
    }

    #[test]
    fn test_entity_kind_table_names() {
        assert_eq!(EntityKind::Quest.table_name(), "quests");
        assert_eq!(EntityKind::SkillNode.table_name(), "skill_nodes");
        assert_eq!(EntityKind::HideoutModule.table_name(), "hideout_modules");
        assert_eq!(EntityKind::EnemyType.table_name(), "enemy_types");
    }

    #[test]
    fn test_only_hideout_modules_deduplicate() {
        use strum::IntoEnumIterator;

        for kind in EntityKind::iter() {
            assert_eq!(kind.deduplicates(), kind == EntityKind::HideoutModule);
        }
    }

    #[test]
    fn test_draft_default_raw_is_object() {
        let draft: EntityDraft = serde_json::from_str(r#"{"external_id": "q1"}"#).unwrap();
        assert_eq!(draft.external_id, "q1");
        assert!(draft.raw.is_object());
    }
}
