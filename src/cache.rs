//! Key-value cache backing token verification, rate limiting, and data reads
//!
//! Provides byte and JSON storage with per-key TTLs, glob pattern deletion,
//! and the counter primitives the fixed-window rate limiter needs. Two
//! backends exist: redis (production, shared across replicas) and an
//! in-process map (`memory`) for tests and single-node deployments.
//!
//! Cache failures are never fatal. Every operation logs at warn and degrades
//! to a miss, and the cache as a whole may be absent - consumers hold an
//! `Option<KvCache>` and must work without one.

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache key for a verified API key, by SHA-256 of the presented key.
pub fn api_key_key(hash: &str) -> String {
    format!("api_key:{hash}")
}

/// Cache key for a verified JWT, by SHA-256 of the compact serialization.
pub fn jwt_key(hash: &str) -> String {
    format!("jwt:{hash}")
}

/// Cache key for a cached data collection, e.g. `data:items:all`.
pub fn data_key(entity: &str, variant: &str) -> String {
    format!("data:{entity}:{variant}")
}

/// Cache key for a rate-limit window counter.
pub fn rate_limit_key(identifier: &str) -> String {
    format!("rate_limit:{identifier}")
}

/// Shared key-value cache with interchangeable backends.
#[derive(Clone)]
pub struct KvCache {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Redis(ConnectionManager),
    Memory(MemoryStore),
}

impl KvCache {
    /// Connects according to the configured URL.
    ///
    /// Empty URL disables the cache entirely. `memory` selects the in-process
    /// backend. Anything else is treated as a redis URL; a failed connection
    /// logs and disables the cache rather than aborting startup.
    pub async fn connect(url: &str) -> Option<Self> {
        match url.trim() {
            "" => None,
            "memory" => Some(Self {
                backend: Backend::Memory(MemoryStore::new()),
            }),
            redis_url => match Self::connect_redis(redis_url).await {
                Ok(manager) => Some(Self {
                    backend: Backend::Redis(manager),
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "cache unavailable, continuing without it");
                    None
                }
            },
        }
    }

    async fn connect_redis(url: &str) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        ConnectionManager::new(client).await
    }

    /// In-process cache, used directly by tests.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::new()),
        }
    }

    /// Fetches raw bytes; errors and expired entries read as misses.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match redis::cmd("GET")
                    .arg(key)
                    .query_async::<_, Option<Vec<u8>>>(&mut conn)
                    .await
                {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(key, error = %e, "cache get failed");
                        None
                    }
                }
            }
            Backend::Memory(store) => store.get(key),
        }
    }

    /// Stores raw bytes with a TTL.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                if let Err(e) = redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .arg(value)
                    .query_async::<_, ()>(&mut conn)
                    .await
                {
                    tracing::warn!(key, error = %e, "cache set failed");
                }
            }
            Backend::Memory(store) => store.set(key, value.to_vec(), Some(ttl)),
        }
    }

    /// Fetches and deserializes a JSON value; decode failures read as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "cache entry failed to decode, dropping it");
                self.delete(key).await;
                None
            }
        }
    }

    /// Serializes and stores a JSON value with a TTL.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes, ttl).await,
            Err(e) => tracing::warn!(key, error = %e, "cache value failed to encode"),
        }
    }

    /// Removes a single key.
    pub async fn delete(&self, key: &str) {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                if let Err(e) = redis::cmd("DEL")
                    .arg(key)
                    .query_async::<_, ()>(&mut conn)
                    .await
                {
                    tracing::warn!(key, error = %e, "cache delete failed");
                }
            }
            Backend::Memory(store) => store.delete(key),
        }
    }

    /// Removes every key matching a glob pattern such as `api_key:*`.
    pub async fn delete_pattern(&self, pattern: &str) {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let mut cursor: u64 = 0;
                loop {
                    let scanned: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn)
                        .await;

                    let (next, keys) = match scanned {
                        Ok(page) => page,
                        Err(e) => {
                            tracing::warn!(pattern, error = %e, "cache scan failed");
                            return;
                        }
                    };

                    if !keys.is_empty() {
                        if let Err(e) = redis::cmd("DEL")
                            .arg(&keys)
                            .query_async::<_, ()>(&mut conn)
                            .await
                        {
                            tracing::warn!(pattern, error = %e, "cache pattern delete failed");
                            return;
                        }
                    }

                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
            }
            Backend::Memory(store) => store.delete_pattern(pattern),
        }
    }

    /// Increments a counter, creating it at 1. Returns `None` on failure so
    /// the rate limiter can fail open.
    pub async fn incr(&self, key: &str) -> Option<i64> {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match redis::cmd("INCR")
                    .arg(key)
                    .query_async::<_, i64>(&mut conn)
                    .await
                {
                    Ok(count) => Some(count),
                    Err(e) => {
                        tracing::warn!(key, error = %e, "cache incr failed");
                        None
                    }
                }
            }
            Backend::Memory(store) => Some(store.incr(key)),
        }
    }

    /// Sets a TTL on an existing key.
    pub async fn expire(&self, key: &str, ttl: Duration) {
        match &self.backend {
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                if let Err(e) = redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .query_async::<_, ()>(&mut conn)
                    .await
                {
                    tracing::warn!(key, error = %e, "cache expire failed");
                }
            }
            Backend::Memory(store) => store.expire(key, ttl),
        }
    }
}

/// In-process backend: a concurrent map with lazy expiry.
#[derive(Clone)]
struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        if entry.expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn delete_pattern(&self, pattern: &str) {
        self.entries.retain(|key, _| !glob_match(pattern, key));
    }

    fn incr(&self, key: &str) -> i64 {
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: b"0".to_vec(),
            expires_at: None,
        });

        if entry.expired() {
            entry.value = b"0".to_vec();
            entry.expires_at = None;
        }

        let current: i64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        entry.value = next.to_string().into_bytes();
        next
    }

    fn expire(&self, key: &str, ttl: Duration) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }
}

/// Minimal glob matcher supporting `*` wildcards, enough for the flat key
/// namespaces used here.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut remainder = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match remainder.strip_prefix(part) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return remainder.ends_with(part);
        } else {
            match remainder.find(part) {
                Some(pos) => remainder = &remainder[pos + part.len()..],
                None => return false,
            }
        }
    }

    // Pattern ended with '*', anything left over matches.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("api_key:*", "api_key:abc123"));
        assert!(glob_match("jwt:*", "jwt:"));
        assert!(glob_match("data:items:*", "data:items:all"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("api_key:*", "jwt:abc"));
        assert!(!glob_match("exact", "exact-not"));
        assert!(glob_match("*:all", "data:items:all"));
        assert!(glob_match("data:*:all", "data:quests:all"));
        assert!(!glob_match("data:*:all", "data:quests:one"));
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(api_key_key("abc"), "api_key:abc");
        assert_eq!(jwt_key("abc"), "jwt:abc");
        assert_eq!(data_key("items", "all"), "data:items:all");
        assert_eq!(rate_limit_key("user:7"), "rate_limit:user:7");
    }

    #[tokio::test]
    async fn test_memory_set_get_delete() {
        let cache = KvCache::memory();

        cache
            .set("k", b"value", Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await, Some(b"value".to_vec()));

        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_expiry() {
        let cache = KvCache::memory();

        cache.set("k", b"v", Duration::from_millis(20)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_json_roundtrip() {
        let cache = KvCache::memory();

        cache
            .set_json("k", &vec![1i64, 2, 3], Duration::from_secs(60))
            .await;
        let value: Option<Vec<i64>> = cache.get_json("k").await;
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_memory_corrupt_json_reads_as_miss() {
        let cache = KvCache::memory();

        cache
            .set("k", b"not-json", Duration::from_secs(60))
            .await;
        let value: Option<Vec<i64>> = cache.get_json("k").await;
        assert_eq!(value, None);
        // The corrupt entry was dropped.
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_incr_and_expire() {
        let cache = KvCache::memory();

        assert_eq!(cache.incr("c").await, Some(1));
        assert_eq!(cache.incr("c").await, Some(2));
        assert_eq!(cache.incr("c").await, Some(3));

        cache.expire("c", Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Window rolled over, counter restarts.
        assert_eq!(cache.incr("c").await, Some(1));
    }

    #[tokio::test]
    async fn test_memory_delete_pattern() {
        let cache = KvCache::memory();

        cache.set("api_key:a", b"1", Duration::from_secs(60)).await;
        cache.set("api_key:b", b"2", Duration::from_secs(60)).await;
        cache.set("jwt:c", b"3", Duration::from_secs(60)).await;

        cache.delete_pattern("api_key:*").await;

        assert_eq!(cache.get("api_key:a").await, None);
        assert_eq!(cache.get("api_key:b").await, None);
        assert_eq!(cache.get("jwt:c").await, Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_disabled_cache_url() {
        assert!(KvCache::connect("").await.is_none());
    }
}
