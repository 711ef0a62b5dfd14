//! Local JWT issuance and verification
//!
//! HS256 tokens with issuer and audience pinned to this service. Every
//! issuance records a SHA-256 of the token in `jwt_records` for audit and
//! bulk revocation. Verification trusts the signature on the hot path and
//! memoizes the resolved user for one minute keyed by the token hash;
//! revocation therefore takes effect immediately when the cache is cleared
//! and within the cache TTL otherwise.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::sha256_hex;
use crate::cache::{self, KvCache};
use crate::error::AppError;
use crate::models::user::{Claims, User};

/// Issuer claim for locally minted tokens.
pub const ISSUER: &str = "arcdata-api";

/// Audience claim for locally minted tokens.
pub const AUDIENCE: &str = "arcdata-api-clients";

/// How long a verified (token, user) pair stays memoized.
const VERIFY_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(60);

/// Local JWT operations.
pub struct JwtManager;

impl JwtManager {
    /// SHA-256 of the compact serialization; the stored identity of a token.
    pub fn token_hash(token: &str) -> String {
        sha256_hex(token.as_bytes())
    }

    /// Token lifetime in seconds for a configured expiry.
    pub fn expiration_seconds(expiry_hours: i64) -> i64 {
        expiry_hours * 3600
    }

    /// Encodes a token for the user without persisting anything.
    pub fn encode_token(
        user: &User,
        secret: &str,
        expiry_hours: i64,
    ) -> Result<(String, DateTime<Utc>), AppError> {
        if secret.is_empty() {
            return Err(AppError::internal("JWT secret is empty"));
        }

        let now = Utc::now();
        let expires_at = now + Duration::hours(expiry_hours);

        let claims = Claims {
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            sub: user.id.to_string(),
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().to_string(),
            role: user.role,
        };

        let header = Header::new(Algorithm::HS256);
        let encoding_key = EncodingKey::from_secret(secret.as_ref());

        let token = encode(&header, &claims, &encoding_key)
            .map_err(|e| AppError::internal(format!("failed to encode JWT: {e}")))?;

        Ok((token, expires_at))
    }

    /// Issues a token and records its hash for audit and revocation.
    pub async fn issue(
        pool: &SqlitePool,
        user: &User,
        secret: &str,
        expiry_hours: i64,
    ) -> Result<String, AppError> {
        let (token, expires_at) = Self::encode_token(user, secret, expiry_hours)?;

        crate::models::credentials::JwtRecord::create(
            pool,
            user.id,
            &Self::token_hash(&token),
            expires_at,
        )
        .await?;

        Ok(token)
    }

    /// Decodes and validates a token. The algorithm is pinned to HS256; a
    /// token signed any other way fails before signature checking.
    pub fn decode_claims(token: &str, secret: &str) -> Result<Claims, AppError> {
        let decoding_key = DecodingKey::from_secret(secret.as_ref());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);

        let token_data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| AppError::Credential(format!("invalid token: {e}")))?;

        Ok(token_data.claims)
    }

    /// Verifies a bearer and resolves its user.
    ///
    /// The signature is the authority; the `jwt_records` row is not consulted
    /// here. Sensitive actions propagate revocation by clearing the `jwt:*`
    /// cache namespace, which bounds stale acceptance to the cache TTL.
    pub async fn verify(
        pool: &SqlitePool,
        cache: Option<&KvCache>,
        token: &str,
        secret: &str,
    ) -> Result<User, AppError> {
        let lookup = cache::jwt_key(&Self::token_hash(token));

        if let Some(cache) = cache {
            if let Some(user) = cache.get_json::<User>(&lookup).await {
                return Ok(user);
            }
        }

        let claims = Self::decode_claims(token, secret)?;

        let user_id: i64 = claims
            .sub
            .parse()
            .map_err(|_| AppError::Credential("malformed subject claim".to_string()))?;

        let user = User::find_by_id(pool, user_id)
            .await?
            .ok_or_else(|| AppError::Credential("token subject no longer exists".to_string()))?;

        if let Some(cache) = cache {
            cache.set_json(&lookup, &user, VERIFY_CACHE_TTL).await;
        }

        Ok(user)
    }
}
