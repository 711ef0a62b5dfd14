//! Rate limiting: inbound admission and outbound backoff
//!
//! Inbound requests are admitted through a fixed window counted in the
//! shared cache, keyed by user id when the bearer is locally readable and by
//! client IP otherwise. The window survives process restarts and is shared
//! across replicas because the counter lives in the cache, not here. Without
//! a cache the limiter fails open.
//!
//! Outbound fetches against the source repository go through
//! [`UpstreamGuard`], which tracks the remote's `X-RateLimit-Remaining` /
//! `X-RateLimit-Reset` headers and sleeps past the reset when the remaining
//! budget runs low.

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::auth::JwtManager;
use crate::cache;
use crate::error::AppError;
use crate::state::AppState;

/// Outbound requests hold back once this much budget remains.
const UPSTREAM_BUFFER: u64 = 5;

/// Slack added past the advertised reset instant.
const UPSTREAM_RESET_SLACK: Duration = Duration::from_millis(100);

/// Health probes are never rate limited.
fn bypasses_rate_limit(path: &str) -> bool {
    path == "/health" || path.starts_with("/health/") || path == "/ready" || path == "/live"
}

/// Identifier for the caller's window: `user:<id>` when the bearer is a
/// readable local token, otherwise `ip:<addr>`. Federated bearers fall back
/// to IP here - full resolution would cost a network round-trip before
/// admission.
fn caller_identifier(request: &Request, jwt_secret: &str) -> String {
    if let Some(token) = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if let Ok(claims) = JwtManager::decode_claims(token, jwt_secret) {
            return format!("user:{}", claims.sub);
        }
    }

    format!("ip:{}", client_ip(request))
}

/// Best-effort client address: first X-Forwarded-For hop, then X-Real-IP.
pub fn client_ip(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Inbound fixed-window admission.
///
/// The first request in a window creates the counter and stamps its TTL;
/// every request increments it. Exceeding the limit returns 429 with
/// `Retry-After` and the `X-RateLimit-*` headers. Cache absence or failure
/// admits the request.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if bypasses_rate_limit(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let Some(cache) = &state.cache else {
        return Ok(next.run(request).await);
    };

    let limit = state.config.rate_limit.limit;
    let window = state.config.rate_limit.window_secs;

    let identifier = caller_identifier(&request, &state.config.auth.jwt_secret);
    let key = cache::rate_limit_key(&identifier);

    let Some(count) = cache.incr(&key).await else {
        // Cache erroring: fail open.
        return Ok(next.run(request).await);
    };

    if count == 1 {
        cache.expire(&key, Duration::from_secs(window)).await;
    }

    let reset = Utc::now().timestamp() + window as i64;

    if count as u64 > limit {
        tracing::debug!(identifier, count, limit, "rate limit exceeded");
        return Err(AppError::RateLimited {
            limit,
            retry_after: window,
            reset,
        });
    }

    let remaining = limit.saturating_sub(count as u64);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&reset.to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }

    Ok(response)
}

#[derive(Debug, Default, Clone, Copy)]
struct UpstreamWindow {
    remaining: Option<u64>,
    reset_at: Option<DateTime<Utc>>,
}

/// Stateful backoff for outbound fetches.
///
/// Mirrors the remote's advertised budget. Before each request, when the
/// remaining budget is at or under the buffer and the reset lies ahead, the
/// caller sleeps until just past the reset. The sleep is a plain awaited
/// timer, so task cancellation interrupts it.
#[derive(Debug, Default)]
pub struct UpstreamGuard {
    window: Mutex<UpstreamWindow>,
}

impl UpstreamGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the upstream window allows another request.
    pub async fn wait_if_needed(&self) {
        let wait = {
            let window = self.window.lock().await;
            wait_duration(window.remaining, window.reset_at, UPSTREAM_BUFFER, Utc::now())
        };

        if let Some(wait) = wait {
            tracing::info!(
                wait_ms = wait.as_millis() as u64,
                "upstream budget low, backing off"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Records the rate-limit headers from an upstream response.
    pub async fn observe(&self, headers: &reqwest::header::HeaderMap) {
        let remaining = header_u64(headers, "x-ratelimit-remaining");
        let reset_at = header_u64(headers, "x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());

        if remaining.is_none() && reset_at.is_none() {
            return;
        }

        let mut window = self.window.lock().await;
        if remaining.is_some() {
            window.remaining = remaining;
        }
        if reset_at.is_some() {
            window.reset_at = reset_at;
        }
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Pure window check: sleep until reset + slack when remaining is at or
/// under the buffer and the reset is still ahead.
fn wait_duration(
    remaining: Option<u64>,
    reset_at: Option<DateTime<Utc>>,
    buffer: u64,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let remaining = remaining?;
    let reset_at = reset_at?;

    if remaining > buffer || reset_at <= now {
        return None;
    }

    let until_reset = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
    Some(until_reset + UPSTREAM_RESET_SLACK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_bypass_paths() {
        assert!(bypasses_rate_limit("/health"));
        assert!(bypasses_rate_limit("/health/ready"));
        assert!(bypasses_rate_limit("/ready"));
        assert!(bypasses_rate_limit("/live"));
        assert!(!bypasses_rate_limit("/api/v1/items"));
        assert!(!bypasses_rate_limit("/healthz"));
    }

    #[test]
    fn test_wait_duration_with_budget_left() {
        let now = Utc::now();
        let reset = now + ChronoDuration::seconds(30);
        assert!(wait_duration(Some(50), Some(reset), 5, now).is_none());
    }

    #[test]
    fn test_wait_duration_when_depleted() {
        let now = Utc::now();
        let reset = now + ChronoDuration::seconds(30);

        let wait = wait_duration(Some(3), Some(reset), 5, now).expect("should wait");
        assert!(wait >= Duration::from_secs(30));
        assert!(wait <= Duration::from_secs(31));
    }

    #[test]
    fn test_wait_duration_after_reset_passed() {
        let now = Utc::now();
        let reset = now - ChronoDuration::seconds(5);
        assert!(wait_duration(Some(0), Some(reset), 5, now).is_none());
    }

    #[test]
    fn test_wait_duration_without_observations() {
        let now = Utc::now();
        assert!(wait_duration(None, None, 5, now).is_none());
        assert!(wait_duration(Some(3), None, 5, now).is_none());
    }

    #[tokio::test]
    async fn test_guard_observe_parses_headers() {
        let guard = UpstreamGuard::new();

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "42".parse().unwrap());
        headers.insert(
            "x-ratelimit-reset",
            (Utc::now().timestamp() + 60).to_string().parse().unwrap(),
        );
        guard.observe(&headers).await;

        let window = guard.window.lock().await;
        assert_eq!(window.remaining, Some(42));
        assert!(window.reset_at.is_some());
    }

    #[tokio::test]
    async fn test_guard_ignores_absent_headers() {
        let guard = UpstreamGuard::new();
        guard.observe(&reqwest::header::HeaderMap::new()).await;

        let window = guard.window.lock().await;
        assert!(window.remaining.is_none());
        assert!(window.reset_at.is_none());
    }
}
