//! ARC Data API - authenticated gateway over community game data
//!
//! Authenticates callers against API keys, locally issued JWTs, and
//! federated OIDC identities; ingests game-data JSON from a public source
//! repository on a cron schedule; and serves the ingested collections
//! through rate-limited read APIs with role-based write access.
//!
//! Built with Axum for async HTTP handling and SQLite for storage, with an
//! optional redis-backed cache in front of token verification and the hot
//! read paths.

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Define default tracing log levels. Uses `RUST_LOG` when unset.
pub const TRACING_LOG_LEVELS: &str = "sqlx=info,tower_http=debug,info";

/// Authentication and authorization
pub mod auth;

/// Key-value cache over redis or process memory
pub mod cache;

/// CLI argument parsing and configuration
pub mod cli;

/// Application configuration
pub mod config;

/// Read-through cache for hot collections
pub mod datacache;

/// Error handling types and conversions
pub mod error;

/// HTTP request handlers
pub mod handlers;

/// Game-data ingestion pipeline
pub mod ingest;

/// HTTP middleware
pub mod middleware;

/// Data models and database operations
pub mod models;

/// Route configuration and middleware assembly
pub mod routes;

/// Application state management
pub mod state;

use crate::cache::KvCache;
use crate::cli::Commands;
use crate::config::{ApiConfig, FileKind};
use crate::datacache::DataCache;
use crate::error::AppError;
use crate::ingest::SyncService;

/// Database connect attempts before giving up on a cold start.
const DB_CONNECT_ATTEMPTS: u32 = 5;

/// Configure tracing and logging using Tokio lib-tracing
pub fn init_tracing() {
    use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

    let rust_log =
        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| TRACING_LOG_LEVELS.to_string());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .parse_lossy(rust_log),
        )
        .init();
}

/// Configure the database pool and run migrations.
///
/// Bounded per the storage discipline: at most 25 open connections, hour-long
/// connection lifetime, idle trimming. Cold starts retry the first connection
/// with exponential backoff before giving up.
pub async fn init_dbpool(db_url: &str) -> Result<sqlx::SqlitePool, AppError> {
    let connect_options = SqliteConnectOptions::from_str(db_url)
        .map_err(AppError::Storage)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .pragma("cache_size", "1000")
        .pragma("temp_store", "memory")
        .pragma("foreign_keys", "on");

    let mut attempt = 0u32;
    let dbpool = loop {
        let result = SqlitePoolOptions::new()
            .max_connections(25)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Some(Duration::from_secs(600)))
            .max_lifetime(Some(Duration::from_secs(3600)))
            .connect_with(connect_options.clone())
            .await;

        match result {
            Ok(pool) => break pool,
            Err(e) => {
                attempt += 1;
                if attempt >= DB_CONNECT_ATTEMPTS {
                    return Err(AppError::Storage(e));
                }
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "database connect failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    };

    sqlx::migrate!("./migrations").run(&dbpool).await?;

    Ok(dbpool)
}

/// Check if provided env-file or config are non-existent and exit gracefully
pub fn does_file_exist(file_name: &Path, file_kind: &str) -> Result<(), AppError> {
    std::fs::read(file_name)
        .with_context(|| format!("couldn't read {file_kind} file '{file_name:?}'"))
        .map_err(AppError::Internal)?;

    Ok(())
}

/// Main application logic - extracted from main() for better testability and reusability
pub async fn run_app(cli: cli::Cli) -> Result<(), AppError> {
    use routes::create_router;

    // Handle setup commands first; `sync` needs full state and runs below.
    match &cli.command {
        Some(Commands::GenConfig { file_name }) => {
            let file = &file_name.clone().unwrap();
            ApiConfig::gen_file(file, FileKind::Toml)?;
            std::process::exit(0);
        }
        Some(Commands::GenEnvFile { file_name }) => {
            let file = &file_name.clone().unwrap();
            ApiConfig::gen_file(file, FileKind::EnvFile)?;
            std::process::exit(0);
        }
        Some(Commands::Sync) | None => {}
    }

    // Get values from either ENV_FILE, CONFIG, or CLI; else exit gracefully
    let apiconfig = match ApiConfig::from_cli(&cli) {
        Ok(apiconfig) => apiconfig,
        Err(e) => {
            // Point at a missing file before surfacing the raw parse error.
            if let Some(file) = &cli.cfg.env_file {
                does_file_exist(file.as_path(), "environment")?;
            }
            if let Some(file) = &cli.cfg.config {
                does_file_exist(file.as_path(), "configuration")?;
            }
            return Err(AppError::Internal(e));
        }
    };

    // Enable tracing using https://tokio.rs/#tk-lib-tracing
    init_tracing();

    apiconfig.validate()?;

    // Setup the database connection pool
    let dbpool = init_dbpool(&apiconfig.database_url).await?;

    // Optional key-value cache; the API runs uncached without one
    let cache = KvCache::connect(&apiconfig.cache_url).await;

    let state = build_state(apiconfig, dbpool, cache).await;

    // One-shot ingestion run for operators backfilling outside the schedule.
    if matches!(cli.command, Some(Commands::Sync)) {
        let summary = state.sync.run().await?;
        for (file, count) in &summary.counts {
            println!("{file}: {count} records upserted");
        }
        if summary.record_errors > 0 || summary.file_errors > 0 {
            println!(
                "completed with {} record errors, {} file errors",
                summary.record_errors, summary.file_errors
            );
        }
        return Ok(());
    }

    // Background work: JWKS priming, cache refresh, handoff sweeping, cron
    if let Some(oidc) = &state.oidc {
        oidc.start().await;
    }
    state.data_cache.spawn_refresh_loop();
    state.handoff.spawn_sweeper();
    state.sync.spawn_scheduler(&state.config.sync);

    // Setup top-level router
    let router = create_router(state.clone()).await;

    // Instantiate a listener on the socket address and port
    let listener = tokio::net::TcpListener::bind((state.config.address, state.config.port))
        .await
        .context("couldn't bind TCP listener")
        .map_err(AppError::Internal)?;

    tracing::info!(
        address = %state.config.address,
        port = state.config.port,
        "serving the API"
    );

    // Serve the API; in-flight requests complete on shutdown
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("couldn't start the API server")
        .map_err(AppError::Internal)?;

    Ok(())
}

/// Assembles the shared state from its parts.
pub async fn build_state(
    apiconfig: ApiConfig,
    dbpool: sqlx::SqlitePool,
    cache: Option<KvCache>,
) -> state::AppState {
    let config = Arc::new(apiconfig);

    let data_cache = DataCache::new(dbpool.clone(), cache.clone());

    let sync = Arc::new(SyncService::new(
        dbpool.clone(),
        data_cache.clone(),
        config.source.clone(),
    ));

    let oidc = config
        .oidc
        .enabled()
        .then(|| Arc::new(auth::OidcVerifier::new(&config.oidc)));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default();

    state::AppState {
        config,
        dbpool,
        cache,
        data_cache,
        sync,
        oidc,
        handoff: Arc::new(auth::HandoffStore::new()),
        http,
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
