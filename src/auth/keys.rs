//! API key issuance and verification
//!
//! Keys are 32 random bytes, URL-safe base64 encoded, returned to the caller
//! exactly once. The store keeps an argon2id hash. Because argon2 salts every
//! hash, verification cannot look a key up directly - it scans the active
//! keys and attempts a compare against each. The cache entry written after a
//! successful scan (keyed by SHA-256 of the presented key) keeps that scan
//! off the hot path.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::auth::{random_token, sha256_hex};
use crate::cache::{self, KvCache};
use crate::error::AppError;
use crate::models::credentials::ApiKey;

/// How long a verified key stays cached before the next full scan.
const VERIFY_CACHE_TTL: Duration = Duration::from_secs(300);

/// API key operations.
pub struct ApiKeyService;

impl ApiKeyService {
    /// Hash key material using Argon2id with a fresh salt.
    pub fn hash_key(plain: &str) -> Result<String, AppError> {
        let mut salt_bytes = [0u8; 16];
        getrandom::fill(&mut salt_bytes)
            .map_err(|e| AppError::internal(format!("failed to generate salt: {e}")))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AppError::internal(format!("failed to encode salt: {e}")))?;

        let argon2 = Argon2::default();

        let key_hash = argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| AppError::internal(format!("failed to hash key: {e}")))?
            .to_string();

        Ok(key_hash)
    }

    /// Verify key material against a stored hash.
    pub fn verify_hash(plain: &str, hash: &str) -> Result<bool, AppError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::internal(format!("failed to parse key hash: {e}")))?;

        let argon2 = Argon2::default();

        match argon2.verify_password(plain.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// Issues a new key for a user. Returns the record and the plain key;
    /// the plain key is never recoverable afterwards.
    pub async fn issue(
        pool: &SqlitePool,
        user_id: i64,
        name: &str,
    ) -> Result<(ApiKey, String), AppError> {
        let plain = random_token()?;
        let key_hash = Self::hash_key(&plain)?;
        let record = ApiKey::create(pool, user_id, name, &key_hash).await?;

        Ok((record, plain))
    }

    /// Verifies a presented key.
    ///
    /// Cache hit short-circuits the scan entirely. On a miss every active key
    /// is tried in turn; the argon2 compares run on a blocking thread so the
    /// scheduler is not starved while key counts grow.
    pub async fn verify(
        pool: &SqlitePool,
        cache: Option<&KvCache>,
        plain: &str,
    ) -> Result<ApiKey, AppError> {
        let lookup = cache::api_key_key(&sha256_hex(plain.as_bytes()));

        if let Some(cache) = cache {
            if let Some(cached) = cache.get_json::<ApiKey>(&lookup).await {
                if !cached.is_revoked() {
                    Self::touch_in_background(pool, cached.id);
                    return Ok(cached);
                }
                // Revoked entry lingering in the cache: drop it and rescan.
                cache.delete(&lookup).await;
            }
        }

        let candidates = ApiKey::find_active(pool).await?;
        let presented = plain.to_string();
        let matched = tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .find(|key| Self::verify_hash(&presented, &key.key_hash).unwrap_or(false))
        })
        .await
        .map_err(|e| AppError::internal(format!("key verification task failed: {e}")))?;

        let Some(key) = matched else {
            return Err(AppError::Credential("invalid API key".to_string()));
        };

        if let Some(cache) = cache {
            cache.set_json(&lookup, &key, VERIFY_CACHE_TTL).await;
        }
        Self::touch_in_background(pool, key.id);

        Ok(key)
    }

    /// Revokes a key and drops any cached verification of it.
    pub async fn revoke(
        pool: &SqlitePool,
        cache: Option<&KvCache>,
        id: i64,
    ) -> Result<(), AppError> {
        let affected = ApiKey::revoke(pool, id).await?;
        if affected == 0 {
            return Err(AppError::NotFound(format!("no active API key with id {id}")));
        }

        // The cache key derives from the plain key, which we no longer have;
        // clear the whole namespace so the revocation lands immediately.
        if let Some(cache) = cache {
            cache.delete_pattern("api_key:*").await;
        }

        Ok(())
    }

    fn touch_in_background(pool: &SqlitePool, id: i64) {
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = ApiKey::touch_last_used(&pool, id).await {
                tracing::warn!(key_id = id, error = %e, "failed to record key usage");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hashing_roundtrip() {
        let plain = random_token().unwrap();

        let hash = ApiKeyService::hash_key(&plain).unwrap();
        assert!(hash.starts_with("$argon2"));

        assert!(ApiKeyService::verify_hash(&plain, &hash).unwrap());
        assert!(!ApiKeyService::verify_hash("wrong-key", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let plain = "the-same-key-material-both-times";

        let first = ApiKeyService::hash_key(plain).unwrap();
        let second = ApiKeyService::hash_key(plain).unwrap();

        assert_ne!(first, second);
        assert!(ApiKeyService::verify_hash(plain, &first).unwrap());
        assert!(ApiKeyService::verify_hash(plain, &second).unwrap());
    }

    #[test]
    fn test_verify_hash_rejects_garbage_hash() {
        assert!(ApiKeyService::verify_hash("key", "not-a-phc-string").is_err());
    }
}
