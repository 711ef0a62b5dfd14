//! Ingestion pipeline
//!
//! A cron-driven sync pulls the game-data JSON files from the source
//! repository, decodes their heterogeneous records into typed entities, and
//! upserts them by external id. Runs are serialized by a single-writer flag:
//! a tick that lands while a run is active is skipped and logged, and
//! `force_sync` clears the flag for an immediate run. Individual record
//! failures never abort a file; individual file failures never abort a run.

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{SourceRepoSettings, SyncSettings};
use crate::datacache::DataCache;
use crate::error::AppError;
use crate::models::entity::{EntityKind, GameEntity};

pub mod decode;
pub mod fetch;
pub mod required;

pub use fetch::SourceClient;

/// The files one sync run fans out over.
const SYNC_FILES: [(&str, EntityKind); 4] = [
    ("quests.json", EntityKind::Quest),
    ("items.json", EntityKind::Item),
    ("skill-nodes.json", EntityKind::SkillNode),
    ("hideout-modules.json", EntityKind::HideoutModule),
];

/// Outcome of one sync run.
#[derive(Debug, Default, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct SyncSummary {
    /// Upserted record count per file.
    pub counts: HashMap<String, usize>,
    /// Records that failed to decode or upsert.
    pub record_errors: usize,
    /// Files that failed outright (fetch or decode of the array).
    pub file_errors: usize,
}

/// The sync service: state machine plus the fan-out worker. Cloning shares
/// the running flag, so every handle observes the same state machine.
#[derive(Clone)]
pub struct SyncService {
    pool: SqlitePool,
    data_cache: DataCache,
    source: SourceClient,
    source_settings: SourceRepoSettings,
    is_running: Arc<Mutex<bool>>,
}

impl SyncService {
    pub fn new(
        pool: SqlitePool,
        data_cache: DataCache,
        source_settings: SourceRepoSettings,
    ) -> Self {
        Self {
            pool,
            data_cache,
            source: SourceClient::new(&source_settings),
            source_settings,
            is_running: Arc::new(Mutex::new(false)),
        }
    }

    /// Public status query.
    pub fn is_running(&self) -> bool {
        self.is_running.lock().map(|flag| *flag).unwrap_or(false)
    }

    /// Transitions Idle -> Running; false when a run already holds the flag.
    fn try_begin(&self) -> bool {
        match self.is_running.lock() {
            Ok(mut flag) => {
                if *flag {
                    false
                } else {
                    *flag = true;
                    true
                }
            }
            Err(_) => false,
        }
    }

    fn finish(&self) {
        if let Ok(mut flag) = self.is_running.lock() {
            *flag = false;
        }
    }

    /// Runs one sync. Conflicts when a run is already active.
    pub async fn run(&self) -> Result<SyncSummary, AppError> {
        if !self.try_begin() {
            return Err(AppError::Conflict("sync already running".to_string()));
        }

        let result = self.run_inner().await;
        self.finish();
        result
    }

    /// Explicit override: clears a stuck Running flag and starts immediately.
    pub async fn force_sync(&self) -> Result<SyncSummary, AppError> {
        self.finish();
        self.run().await
    }

    async fn run_inner(&self) -> Result<SyncSummary, AppError> {
        tracing::info!("sync run starting");

        // Fan out one task per file. Fatal per-file errors drain through a
        // bounded channel; per-record errors are only counted.
        let (error_tx, mut error_rx) =
            tokio::sync::mpsc::channel::<(String, AppError)>(SYNC_FILES.len());
        let mut handles = Vec::with_capacity(SYNC_FILES.len());

        for (file, kind) in SYNC_FILES {
            let service = self.clone();
            let error_tx = error_tx.clone();
            handles.push(tokio::spawn(async move {
                match service.sync_file(file, kind).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        let _ = error_tx.send((file.to_string(), e)).await;
                        None
                    }
                }
            }));
        }
        drop(error_tx);

        let mut summary = SyncSummary::default();
        for handle in handles {
            match handle.await {
                Ok(Some((file, upserted, failed))) => {
                    summary.counts.insert(file, upserted);
                    summary.record_errors += failed;
                }
                Ok(None) => summary.file_errors += 1,
                Err(e) => {
                    tracing::error!(error = %e, "sync worker panicked");
                    summary.file_errors += 1;
                }
            }
        }

        while let Some((file, error)) = error_rx.recv().await {
            tracing::error!(file, error = %error, "file sync failed");
        }

        // Readers pick up the new state on their next cache miss.
        self.data_cache.invalidate_items().await;
        self.data_cache.invalidate_quests().await;

        tracing::info!(
            counts = ?summary.counts,
            record_errors = summary.record_errors,
            file_errors = summary.file_errors,
            "sync run finished"
        );

        Ok(summary)
    }

    /// Fetches and upserts one file. Returns (file, upserted, failed
    /// records); a missing file counts as zero records, not an error.
    async fn sync_file(
        &self,
        file: &str,
        kind: EntityKind,
    ) -> Result<(String, usize, usize), AppError> {
        let Some(records) = self.source.fetch_records(file).await? else {
            tracing::warn!(file, "source file missing, skipping");
            return Ok((file.to_string(), 0, 0));
        };

        let mut upserted = 0usize;
        let mut failed = 0usize;

        for record in &records {
            let Some(draft) = decode::build_draft(kind, record, &self.source_settings) else {
                tracing::warn!(file, "record without usable id, skipping");
                failed += 1;
                continue;
            };

            match GameEntity::upsert_by_external_id(&self.pool, kind, &draft).await {
                Ok(_) => upserted += 1,
                Err(e) => {
                    tracing::warn!(
                        file,
                        external_id = draft.external_id,
                        error = %e,
                        "record upsert failed"
                    );
                    failed += 1;
                }
            }
        }

        tracing::info!(file, upserted, failed, "file synced");
        Ok((file.to_string(), upserted, failed))
    }

    /// Runs the cron dispatcher until shutdown. Each matching tick attempts
    /// one run; ticks overlapping an active run are skipped. The dispatch
    /// body is spawned per tick so a panic cannot kill the scheduler.
    pub fn spawn_scheduler(&self, settings: &SyncSettings) {
        if !settings.enabled {
            tracing::info!("sync scheduler disabled by configuration");
            return;
        }

        let schedule = match settings.schedule() {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::error!(error = %e, "sync scheduler not started");
                return;
            }
        };

        let service = self.clone();
        let cron = settings.cron.clone();
        tokio::spawn(async move {
            tracing::info!(cron, "sync scheduler started");
            loop {
                let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                    tracing::warn!("cron schedule has no future ticks, scheduler stopping");
                    break;
                };

                let wait = (next - chrono::Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(wait).await;

                if service.is_running() {
                    tracing::info!("sync tick skipped, previous run still active");
                    continue;
                }

                let run = service.clone();
                let outcome = tokio::spawn(async move { run.run().await }).await;
                match outcome {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "scheduled sync failed"),
                    Err(e) => tracing::error!(error = %e, "scheduled sync panicked"),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Arc<SyncService> {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        let data_cache = DataCache::new(pool.clone(), None);
        Arc::new(SyncService::new(
            pool,
            data_cache,
            SourceRepoSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_state_machine_transitions() {
        let service = service();

        assert!(!service.is_running());
        assert!(service.try_begin());
        assert!(service.is_running());

        // Second begin while running is refused.
        assert!(!service.try_begin());

        service.finish();
        assert!(!service.is_running());
        assert!(service.try_begin());
    }

    #[tokio::test]
    async fn test_concurrent_begins_admit_exactly_one() {
        let service = service();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move { service.try_begin() }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1, "only one concurrent run may begin");
        assert!(service.is_running());
    }

    #[test]
    fn test_sync_files_cover_the_four_collections() {
        let kinds: Vec<EntityKind> = SYNC_FILES.iter().map(|(_, k)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::Quest,
                EntityKind::Item,
                EntityKind::SkillNode,
                EntityKind::HideoutModule
            ]
        );
    }
}
