//! OIDC token verification against a federated identity provider
//!
//! Verifies RS256 JWS bearers against the provider's JWKS, which is fetched
//! at startup and cached under a read-write lock. An unknown `kid` or a cache
//! older than an hour triggers one refresh-and-retry; concurrent misses
//! serialize on the write lock and short-circuit once the first refresh
//! lands.
//!
//! Some providers hand out opaque (JWE or reference) access tokens that are
//! not parseable JWS. Those surface as [`OidcError::Opaque`] so the caller
//! can fall back to the userinfo endpoint.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::OidcSettings;
use crate::error::AppError;

/// JWKS entries older than this are refreshed before use.
const JWKS_MAX_AGE: Duration = Duration::from_secs(3600);

/// A refresh completed this recently satisfies any queued miss.
const JWKS_REFRESH_DEBOUNCE: Duration = Duration::from_secs(10);

/// HTTP timeout for JWKS and userinfo calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Verification failures, split so the orchestrator can route opaque tokens
/// to the userinfo fallback.
#[derive(thiserror::Error, Debug)]
pub enum OidcError {
    /// The token is not a readable JWS (e.g. a JWE payload); try userinfo.
    #[error("token is not a verifiable JWS")]
    Opaque,

    /// The token is a JWS but failed verification.
    #[error("token rejected: {0}")]
    Invalid(String),

    /// JWKS fetch or parse failure.
    #[error("JWKS unavailable: {0}")]
    Jwks(String),

    /// Userinfo endpoint failure.
    #[error("userinfo unavailable: {0}")]
    Userinfo(String),
}

impl From<OidcError> for AppError {
    fn from(err: OidcError) -> Self {
        match err {
            OidcError::Opaque | OidcError::Invalid(_) => AppError::Credential(err.to_string()),
            OidcError::Jwks(msg) | OidcError::Userinfo(msg) => AppError::upstream(msg),
        }
    }
}

/// Claims extracted from a verified federated credential, uniform across the
/// JWS and userinfo paths.
#[derive(Debug, Clone)]
pub struct OidcClaims {
    pub subject: Option<String>,
    pub email: String,
    pub preferred_username: Option<String>,
    pub name: Option<String>,
    pub groups: Vec<String>,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Deserialize)]
struct FederatedClaims {
    sub: Option<String>,
    email: Option<String>,
    preferred_username: Option<String>,
    name: Option<String>,
    groups: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct UserinfoResponse {
    sub: Option<String>,
    email: Option<String>,
    preferred_username: Option<String>,
    name: Option<String>,
    groups: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    refreshed_at: Option<Instant>,
}

impl JwksCache {
    fn stale(&self) -> bool {
        match self.refreshed_at {
            Some(at) => at.elapsed() > JWKS_MAX_AGE,
            None => true,
        }
    }

    fn just_refreshed(&self) -> bool {
        self.refreshed_at
            .is_some_and(|at| at.elapsed() < JWKS_REFRESH_DEBOUNCE)
    }
}

/// JWKS-backed verifier for one configured provider.
pub struct OidcVerifier {
    issuer: String,
    jwks_url: String,
    audience: String,
    userinfo_url: String,
    http: reqwest::Client,
    jwks: RwLock<JwksCache>,
}

impl OidcVerifier {
    pub fn new(settings: &OidcSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            issuer: settings.issuer.clone(),
            jwks_url: settings.jwks_url.clone(),
            audience: settings.audience.clone(),
            userinfo_url: settings.userinfo_url.clone(),
            http,
            jwks: RwLock::new(JwksCache {
                keys: HashMap::new(),
                refreshed_at: None,
            }),
        }
    }

    /// Primes the JWKS cache at startup. A failure is logged, not fatal -
    /// the first verification retries.
    pub async fn start(&self) {
        if let Err(e) = self.refresh_jwks().await {
            tracing::warn!(error = %e, "initial JWKS fetch failed");
        }
    }

    /// Validates a federated JWS bearer.
    pub async fn validate(&self, token: &str) -> Result<OidcClaims, OidcError> {
        // A JWE (five segments) or anything else that is not compact JWS
        // cannot be verified locally.
        if token.split('.').count() != 3 {
            return Err(OidcError::Opaque);
        }
        let header = decode_header(token).map_err(|_| OidcError::Opaque)?;

        if header.alg != Algorithm::RS256 {
            return Err(OidcError::Invalid(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| OidcError::Invalid("token has no key id".to_string()))?;

        let key = self.key_for(&kid).await?.ok_or_else(|| {
            OidcError::Invalid(format!("no signing key {kid} after JWKS refresh"))
        })?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);

        let data = decode::<FederatedClaims>(token, &key, &validation)
            .map_err(|e| OidcError::Invalid(e.to_string()))?;

        let email = data
            .claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| OidcError::Invalid("token carries no email claim".to_string()))?;

        Ok(OidcClaims {
            subject: data.claims.sub,
            email,
            preferred_username: data.claims.preferred_username,
            name: data.claims.name,
            groups: data.claims.groups.unwrap_or_default(),
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
        })
    }

    /// Resolves an opaque access token through the userinfo endpoint.
    ///
    /// Returned claims carry the configured issuer and audience so callers
    /// see one claim shape regardless of the verification path.
    pub async fn validate_via_userinfo(&self, access_token: &str) -> Result<OidcClaims, OidcError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OidcError::Userinfo(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(OidcError::Userinfo(format!(
                "userinfo returned {}",
                response.status()
            )));
        }

        let info: UserinfoResponse = response
            .json()
            .await
            .map_err(|e| OidcError::Userinfo(format!("userinfo body unreadable: {e}")))?;

        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| OidcError::Userinfo("userinfo carries no email".to_string()))?;

        Ok(OidcClaims {
            subject: info.sub,
            email,
            preferred_username: info.preferred_username,
            name: info.name,
            groups: info.groups.unwrap_or_default(),
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
        })
    }

    /// Looks up a signing key, refreshing the JWKS when the key is unknown
    /// or the cache has gone stale.
    async fn key_for(&self, kid: &str) -> Result<Option<DecodingKey>, OidcError> {
        {
            let cache = self.jwks.read().await;
            if !cache.stale() {
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(Some(key.clone()));
                }
            }
        }

        self.refresh_jwks().await?;

        let cache = self.jwks.read().await;
        Ok(cache.keys.get(kid).cloned())
    }

    /// Fetches and parses the JWKS under the write lock. A concurrent caller
    /// that already refreshed satisfies this call without a second fetch.
    async fn refresh_jwks(&self) -> Result<(), OidcError> {
        let mut cache = self.jwks.write().await;
        if cache.just_refreshed() {
            return Ok(());
        }

        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| OidcError::Jwks(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::Jwks(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| OidcError::Jwks(format!("JWKS body unreadable: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in document.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(err) => {
                    tracing::warn!(kid, error = %err, "skipping unparseable JWKS entry");
                }
            }
        }

        if keys.is_empty() {
            return Err(OidcError::Jwks("JWKS contained no usable keys".to_string()));
        }

        tracing::debug!(count = keys.len(), "JWKS refreshed");
        cache.keys = keys;
        cache.refreshed_at = Some(Instant::now());

        Ok(())
    }
}
