//! Source repository fetches
//!
//! Raw-content GETs against the configured GitHub repository, routed through
//! the outbound rate-limit guard. A missing file is not an error - the
//! source repository reorganizes occasionally and a sync must survive that.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SourceRepoSettings;
use crate::error::AppError;
use crate::middleware::rate_limit::UpstreamGuard;

/// Timeout for data-file fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the source repository.
#[derive(Clone)]
pub struct SourceClient {
    http: reqwest::Client,
    guard: Arc<UpstreamGuard>,
    base: String,
}

impl SourceClient {
    pub fn new(source: &SourceRepoSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            guard: Arc::new(UpstreamGuard::new()),
            base: source.raw_base(),
        }
    }

    /// Fetches one JSON file as an array of loose records.
    ///
    /// `Ok(None)` means 404: warn-and-skip territory for the caller. Any
    /// other non-success status is an upstream error. Rate-limit headers on
    /// every response feed the outbound guard.
    pub async fn fetch_records(
        &self,
        file: &str,
    ) -> Result<Option<Vec<Map<String, Value>>>, AppError> {
        self.guard.wait_if_needed().await;

        let url = format!("{}/{}", self.base, file);
        let response = self.http.get(&url).send().await?;

        self.guard.observe(response.headers()).await;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::upstream(format!(
                "source returned {} for {url}",
                response.status()
            )));
        }

        let records: Vec<Map<String, Value>> = response
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("source file {file} unreadable: {e}")))?;

        Ok(Some(records))
    }
}
