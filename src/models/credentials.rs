//! Credential records: API keys, JWT issuances, refresh tokens, PKCE codes
//!
//! Nothing here stores secret material. API keys keep a salted argon2 hash;
//! tokens and codes keep a SHA-256 of the presented value, which makes
//! lookups a single indexed match. `revoked_at` is monotonic - once set it is
//! never cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;

use crate::error::AppError;

/// A named API key belonging to a user. The key itself exists only at
/// issuance; this row holds its argon2 hash.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ApiKey {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    // Never serialized; cached copies deserialize with an empty hash, which
    // is fine - the hash is only read during the verification scan.
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub async fn create(
        pool: &SqlitePool,
        user_id: i64,
        name: &str,
        key_hash: &str,
    ) -> Result<Self, AppError> {
        sqlx::query_as(
            "INSERT INTO api_keys (user_id, name, key_hash) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(user_id)
        .bind(name)
        .bind(key_hash)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, AppError> {
        sqlx::query_as("SELECT * FROM api_keys WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// All keys that could still verify: verification scans these and
    /// attempts an argon2 compare against each.
    pub async fn find_active(pool: &SqlitePool) -> Result<Vec<Self>, AppError> {
        sqlx::query_as("SELECT * FROM api_keys WHERE revoked_at IS NULL ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_active_by_user_id(
        pool: &SqlitePool,
        user_id: i64,
    ) -> Result<Vec<Self>, AppError> {
        sqlx::query_as(
            "SELECT * FROM api_keys WHERE user_id = $1 AND revoked_at IS NULL ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Marks the key revoked. Returns the affected row count so callers can
    /// distinguish a miss from an already-revoked key.
    pub async fn revoke(pool: &SqlitePool, id: i64) -> Result<u64, AppError> {
        let result =
            sqlx::query("UPDATE api_keys SET revoked_at = $1 WHERE id = $2 AND revoked_at IS NULL")
                .bind(Utc::now())
                .bind(id)
                .execute(pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Records key usage. Called off the request path.
    pub async fn touch_last_used(pool: &SqlitePool, id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;

        Ok(())
    }
}

/// Audit record of a locally issued JWT, keyed by SHA-256 of the token.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct JwtRecord {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing, default)]
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl JwtRecord {
    pub async fn create(
        pool: &SqlitePool,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        sqlx::query_as(
            "INSERT INTO jwt_records (user_id, token_hash, expires_at) \
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, AppError> {
        sqlx::query_as("SELECT * FROM jwt_records WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn revoke(pool: &SqlitePool, id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE jwt_records SET revoked_at = $1 WHERE id = $2 AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn revoke_by_hash(pool: &SqlitePool, token_hash: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE jwt_records SET revoked_at = $1 WHERE token_hash = $2 AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(token_hash)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Single-use refresh token, rotated on every presentation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    pub async fn create(
        pool: &SqlitePool,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        sqlx::query_as(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) \
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Time-bounded hash lookup: only unrevoked, unexpired tokens match.
    pub async fn find_active_by_hash(
        pool: &SqlitePool,
        token_hash: &str,
    ) -> Result<Option<Self>, AppError> {
        sqlx::query_as(
            "SELECT * FROM refresh_tokens \
             WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2",
        )
        .bind(token_hash)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn revoke(pool: &SqlitePool, id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $1, last_used_at = $1 \
             WHERE id = $2 AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// One-time PKCE authorization code, stored by SHA-256 with its challenge.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub id: i64,
    pub user_id: i64,
    pub code_hash: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl AuthorizationCode {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub async fn create(
        pool: &SqlitePool,
        user_id: i64,
        code_hash: &str,
        code_challenge: &str,
        code_challenge_method: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        sqlx::query_as(
            "INSERT INTO authorization_codes \
             (user_id, code_hash, code_challenge, code_challenge_method, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(user_id)
        .bind(code_hash)
        .bind(code_challenge)
        .bind(code_challenge_method)
        .bind(expires_at)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_hash(
        pool: &SqlitePool,
        code_hash: &str,
    ) -> Result<Option<Self>, AppError> {
        sqlx::query_as("SELECT * FROM authorization_codes WHERE code_hash = $1")
            .bind(code_hash)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Marks the code consumed. The `consumed_at IS NULL` guard makes the
    /// consumption itself the atomic one-time check under concurrent
    /// exchanges.
    pub async fn consume(pool: &SqlitePool, id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE authorization_codes SET consumed_at = $1 \
             WHERE id = $2 AND consumed_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}
