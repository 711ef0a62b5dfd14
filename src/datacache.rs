//! Read-through cache for the two hottest collections
//!
//! Items and quests are served from full arrays held in the key-value cache
//! (`data:items:all`, `data:quests:all`) so the paginated read path never
//! touches the store while the cache is warm. A background loop refreshes
//! both arrays immediately at startup and every fifteen minutes after; a
//! stale read also kicks off an opportunistic refresh. The ingest pipeline
//! and the write handlers invalidate explicitly.
//!
//! Without a configured cache every read falls through to the store and the
//! refresh loop stays idle.

use sqlx::SqlitePool;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::cache::{self, KvCache};
use crate::error::AppError;
use crate::models::entity::{EntityKind, GameEntity};

/// TTL of the cached arrays.
const DATA_TTL: Duration = Duration::from_secs(15 * 60);

/// Cadence of the background refresh, and the staleness bound that triggers
/// an on-demand one.
const REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Read-through cache over items and quests.
#[derive(Clone)]
pub struct DataCache {
    pool: SqlitePool,
    cache: Option<KvCache>,
    last_items_refresh: Arc<RwLock<Option<Instant>>>,
    last_quests_refresh: Arc<RwLock<Option<Instant>>>,
}

impl DataCache {
    pub fn new(pool: SqlitePool, cache: Option<KvCache>) -> Self {
        Self {
            pool,
            cache,
            last_items_refresh: Arc::new(RwLock::new(None)),
            last_quests_refresh: Arc::new(RwLock::new(None)),
        }
    }

    /// Paginated item read. Cache hits slice the array directly; misses fall
    /// through to the store and schedule a repopulation when the cache has
    /// gone stale.
    pub async fn get_items(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<GameEntity>, i64), AppError> {
        if let Some(cache) = &self.cache {
            let key = cache::data_key("items", "all");
            if let Some(all) = cache.get_json::<Vec<GameEntity>>(&key).await {
                let total = all.len() as i64;
                return Ok((slice_page(all, offset, limit), total));
            }
            self.schedule_refresh_if_stale(EntityKind::Item);
        }

        GameEntity::find_all(&self.pool, EntityKind::Item, offset, limit).await
    }

    /// Full quest list.
    pub async fn get_quests(&self) -> Result<Vec<GameEntity>, AppError> {
        if let Some(cache) = &self.cache {
            let key = cache::data_key("quests", "all");
            if let Some(all) = cache.get_json::<Vec<GameEntity>>(&key).await {
                return Ok(all);
            }
            self.schedule_refresh_if_stale(EntityKind::Quest);
        }

        GameEntity::list_all(&self.pool, EntityKind::Quest).await
    }

    /// Rebuilds the cached item array from the store.
    pub async fn refresh_items(&self) -> Result<(), AppError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };

        let all = GameEntity::list_all(&self.pool, EntityKind::Item).await?;
        cache
            .set_json(&cache::data_key("items", "all"), &all, DATA_TTL)
            .await;
        self.mark_refreshed(EntityKind::Item);

        tracing::debug!(count = all.len(), "item cache refreshed");
        Ok(())
    }

    /// Rebuilds the cached quest array from the store.
    pub async fn refresh_quests(&self) -> Result<(), AppError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };

        let all = GameEntity::list_all(&self.pool, EntityKind::Quest).await?;
        cache
            .set_json(&cache::data_key("quests", "all"), &all, DATA_TTL)
            .await;
        self.mark_refreshed(EntityKind::Quest);

        tracing::debug!(count = all.len(), "quest cache refreshed");
        Ok(())
    }

    /// Drops the cached item array. Next read repopulates.
    pub async fn invalidate_items(&self) {
        if let Some(cache) = &self.cache {
            cache.delete(&cache::data_key("items", "all")).await;
        }
        if let Ok(mut last) = self.last_items_refresh.write() {
            *last = None;
        }
    }

    /// Drops the cached quest array. Next read repopulates.
    pub async fn invalidate_quests(&self) {
        if let Some(cache) = &self.cache {
            cache.delete(&cache::data_key("quests", "all")).await;
        }
        if let Ok(mut last) = self.last_quests_refresh.write() {
            *last = None;
        }
    }

    /// Starts the background refresh loop: an immediate warm-up, then one
    /// refresh per interval. Each round runs in its own task so a panic is
    /// contained, logged, and does not stop the loop.
    pub fn spawn_refresh_loop(&self) {
        if self.cache.is_none() {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let round = this.clone();
                let outcome = tokio::spawn(async move {
                    if let Err(e) = round.refresh_items().await {
                        tracing::warn!(error = %e, "item cache refresh failed");
                    }
                    if let Err(e) = round.refresh_quests().await {
                        tracing::warn!(error = %e, "quest cache refresh failed");
                    }
                })
                .await;

                if let Err(e) = outcome {
                    tracing::error!(error = %e, "cache refresh round panicked, continuing");
                }

                tokio::time::sleep(REFRESH_INTERVAL).await;
            }
        });
    }

    fn mark_refreshed(&self, kind: EntityKind) {
        let slot = match kind {
            EntityKind::Item => &self.last_items_refresh,
            _ => &self.last_quests_refresh,
        };
        if let Ok(mut last) = slot.write() {
            *last = Some(Instant::now());
        }
    }

    fn is_stale(&self, kind: EntityKind) -> bool {
        let slot = match kind {
            EntityKind::Item => &self.last_items_refresh,
            _ => &self.last_quests_refresh,
        };
        match slot.read() {
            Ok(last) => match *last {
                Some(at) => at.elapsed() > REFRESH_INTERVAL,
                None => true,
            },
            Err(_) => true,
        }
    }

    fn schedule_refresh_if_stale(&self, kind: EntityKind) {
        if !self.is_stale(kind) {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let result = match kind {
                EntityKind::Item => this.refresh_items().await,
                _ => this.refresh_quests().await,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "on-demand cache refresh failed");
            }
        });
    }
}

/// Applies offset/limit to an already-loaded array. Negative limit means
/// the rest of the array.
pub fn slice_page(all: Vec<GameEntity>, offset: i64, limit: i64) -> Vec<GameEntity> {
    let start = offset.max(0) as usize;
    if start >= all.len() {
        return Vec::new();
    }
    let end = if limit < 0 {
        all.len()
    } else {
        (start + limit as usize).min(all.len())
    };

    all[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::types::Json;

    fn entity(id: i64) -> GameEntity {
        GameEntity {
            id,
            external_id: format!("e{id}"),
            name: None,
            description: None,
            trader: None,
            category: None,
            entity_type: None,
            icon_name: None,
            impacted_skill: None,
            xp: None,
            max_level: None,
            max_points: None,
            objectives: None,
            reward_item_ids: None,
            levels: None,
            position: None,
            prerequisite_node_ids: None,
            known_value: None,
            image_url: None,
            raw: Json(json!({})),
            synced_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_slice_page() {
        let all: Vec<GameEntity> = (1..=5).map(entity).collect();

        let page = slice_page(all.clone(), 0, 2);
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);

        let page = slice_page(all.clone(), 3, 10);
        assert_eq!(page.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4, 5]);

        let page = slice_page(all.clone(), 10, 2);
        assert!(page.is_empty());

        let page = slice_page(all, 0, -1);
        assert_eq!(page.len(), 5);
    }
}
