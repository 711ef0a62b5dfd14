//! Application state module
//!
//! The shared resources every handler and middleware can reach: the
//! immutable configuration, the database pool, the optional key-value cache,
//! the read-through data cache, the sync service, the OIDC verifier when
//! federation is configured, the OAuth handoff store, and a shared HTTP
//! client for provider calls.
//!
//! Cloning is cheap - every field is a handle (`Arc`, pool, client) onto the
//! same underlying resource. Configuration is assembled once at startup and
//! never mutated afterwards.

use std::sync::Arc;

use crate::auth::{HandoffStore, OidcVerifier};
use crate::cache::KvCache;
use crate::config::ApiConfig;
use crate::datacache::DataCache;
use crate::ingest::SyncService;

/// Central application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Immutable runtime configuration.
    pub config: Arc<ApiConfig>,

    /// SQLite connection pool.
    pub dbpool: sqlx::SqlitePool,

    /// Optional key-value cache; `None` runs the API uncached.
    pub cache: Option<KvCache>,

    /// Read-through cache over the items and quests collections.
    pub data_cache: DataCache,

    /// Ingestion pipeline handle.
    pub sync: Arc<SyncService>,

    /// OIDC verifier when federation is configured.
    pub oidc: Option<Arc<OidcVerifier>>,

    /// One-time handoff entries bridging the OAuth redirect.
    pub handoff: Arc<HandoffStore>,

    /// Shared HTTP client for OAuth provider calls.
    pub http: reqwest::Client,
}
