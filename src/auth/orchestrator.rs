//! Credential orchestration
//!
//! Ties the verification primitives together: resolves any presented bearer
//! to a local user, synchronizes federated identities into the user table,
//! exchanges API keys for JWTs, runs the PKCE code flow and refresh rotation,
//! and carries OAuth callbacks across the browser-redirect boundary with
//! one-time handoff tokens.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::auth::{base64url_sha256, random_token, sha256_hex, ApiKeyService, JwtManager};
use crate::auth::oidc::{OidcClaims, OidcError};
use crate::cache::KvCache;
use crate::error::AppError;
use crate::models::credentials::{AuthorizationCode, RefreshToken};
use crate::models::user::{
    AuthResponse, AuthorizeRequest, AuthorizeResponse, NewUser, Role, TokenPairResponse, User,
};
use crate::state::AppState;
use sqlx::SqlitePool;

/// Authorization codes live for one minute.
const CODE_TTL_SECS: i64 = 60;

/// Refresh tokens live for thirty days; each is good for one rotation.
const REFRESH_TTL_DAYS: i64 = 30;

/// Handoff entries not exchanged within ten minutes are swept.
const HANDOFF_MAX_AGE: Duration = Duration::from_secs(600);

/// Sweep cadence for the handoff map.
const HANDOFF_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Minimum presented-code length accepted by the token endpoint.
const MIN_CODE_LEN: usize = 16;

/// Minimum PKCE verifier length (RFC 7636).
const MIN_VERIFIER_LEN: usize = 43;

/// Resolves an `Authorization: Bearer` value to a local user.
///
/// Local HS256 tokens are tried first. When OIDC is configured, a federated
/// JWS is verified next, and an opaque token falls through to the userinfo
/// endpoint. Whatever verified, the caller gets a row from the local user
/// table.
pub async fn resolve_bearer(state: &AppState, token: &str) -> Result<User, AppError> {
    match JwtManager::verify(
        &state.dbpool,
        state.cache.as_ref(),
        token,
        &state.config.auth.jwt_secret,
    )
    .await
    {
        Ok(user) => return Ok(user),
        Err(e) => {
            tracing::trace!(error = %e, "not a local token, trying federated verification");
        }
    }

    let Some(oidc) = &state.oidc else {
        return Err(AppError::Credential("invalid bearer token".to_string()));
    };

    let claims = match oidc.validate(token).await {
        Ok(claims) => claims,
        Err(OidcError::Opaque) => oidc.validate_via_userinfo(token).await.map_err(AppError::from)?,
        Err(e) => return Err(e.into()),
    };

    sync_federated(&state.dbpool, &claims, &state.config.auth.admin_group).await
}

/// Synchronizes a verified federated identity into the local user table:
/// find by provider subject, then by email, then create. Membership in the
/// configured admin group grants the admin role; absence never demotes.
pub async fn sync_federated(
    pool: &SqlitePool,
    claims: &OidcClaims,
    admin_group: &str,
) -> Result<User, AppError> {
    let should_be_admin = claims.groups.iter().any(|g| g == admin_group);

    let mut user = match find_federated(pool, claims).await? {
        Some(existing) => existing,
        None => {
            let username = claims
                .preferred_username
                .clone()
                .unwrap_or_else(|| email_local_part(&claims.email));
            let role = if should_be_admin {
                Role::Admin
            } else {
                Role::User
            };

            create_with_username_fallback(
                pool,
                NewUser {
                    email: &claims.email,
                    username: &username,
                    role,
                    github_id: None,
                    oidc_sub: claims.subject.as_deref(),
                },
            )
            .await?
        }
    };

    if user.oidc_sub.is_none() {
        if let Some(sub) = &claims.subject {
            user = User::set_oidc_sub(pool, user.id, sub).await?;
        }
    }

    if should_be_admin && user.role != Role::Admin {
        user = User::update_role(pool, user.id, Role::Admin).await?;
    }

    Ok(user)
}

async fn find_federated(pool: &SqlitePool, claims: &OidcClaims) -> Result<Option<User>, AppError> {
    if let Some(sub) = &claims.subject {
        if let Some(user) = User::find_by_oidc_sub(pool, sub).await? {
            return Ok(Some(user));
        }
    }
    User::find_by_email(pool, &claims.email).await
}

/// Exchanges a valid API key for a short-lived local JWT.
pub async fn login_with_api_key(state: &AppState, api_key: &str) -> Result<AuthResponse, AppError> {
    let key = ApiKeyService::verify(&state.dbpool, state.cache.as_ref(), api_key).await?;

    let user = User::find_by_id(&state.dbpool, key.user_id)
        .await?
        .ok_or_else(|| AppError::Credential("key owner no longer exists".to_string()))?;

    let token = JwtManager::issue(
        &state.dbpool,
        &user,
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_expiry_hours,
    )
    .await?;

    Ok(AuthResponse {
        token,
        expires_in: JwtManager::expiration_seconds(state.config.auth.jwt_expiry_hours),
        user,
    })
}

/// Issues a one-time PKCE authorization code bound to the given challenge.
pub async fn issue_authorization_code(
    pool: &SqlitePool,
    user_id: i64,
    request: &AuthorizeRequest,
) -> Result<AuthorizeResponse, AppError> {
    if request.code_challenge_method != "S256" && request.code_challenge_method != "plain" {
        return Err(AppError::Input(
            "code_challenge_method must be S256 or plain".to_string(),
        ));
    }
    validate_redirect_uri(&request.redirect_uri)?;

    let code = random_token()?;
    let expires_at = Utc::now() + ChronoDuration::seconds(CODE_TTL_SECS);

    AuthorizationCode::create(
        pool,
        user_id,
        &sha256_hex(code.as_bytes()),
        &request.code_challenge,
        &request.code_challenge_method,
        expires_at,
    )
    .await?;

    Ok(AuthorizeResponse {
        code,
        expires_in: CODE_TTL_SECS,
    })
}

/// Redeems an authorization code for a JWT and refresh token.
///
/// Constraint checks run before any lookup. Consumption is the atomic
/// one-time gate: a replay hits the `consumed_at IS NULL` guard and conflicts.
pub async fn exchange_authorization_code(
    state: &AppState,
    code: &str,
    code_verifier: &str,
    redirect_uri: &str,
) -> Result<TokenPairResponse, AppError> {
    if code.len() < MIN_CODE_LEN {
        return Err(AppError::Input("authorization code too short".to_string()));
    }
    if code_verifier.len() < MIN_VERIFIER_LEN {
        return Err(AppError::Input("code verifier too short".to_string()));
    }
    validate_redirect_uri(redirect_uri)?;

    let record = AuthorizationCode::find_by_hash(&state.dbpool, &sha256_hex(code.as_bytes()))
        .await?
        .ok_or_else(|| AppError::Credential("unknown authorization code".to_string()))?;

    if record.is_expired() {
        return Err(AppError::Credential("authorization code expired".to_string()));
    }
    if record.is_consumed() {
        return Err(AppError::Conflict(
            "authorization code already consumed".to_string(),
        ));
    }

    let challenge_ok = match record.code_challenge_method.as_str() {
        "S256" => base64url_sha256(code_verifier) == record.code_challenge,
        "plain" => code_verifier == record.code_challenge,
        other => {
            return Err(AppError::Credential(format!(
                "unsupported challenge method {other}"
            )))
        }
    };
    if !challenge_ok {
        return Err(AppError::Credential("code verifier mismatch".to_string()));
    }

    let consumed = AuthorizationCode::consume(&state.dbpool, record.id).await?;
    if consumed == 0 {
        return Err(AppError::Conflict(
            "authorization code already consumed".to_string(),
        ));
    }

    let user = User::find_by_id(&state.dbpool, record.user_id)
        .await?
        .ok_or_else(|| AppError::Credential("code owner no longer exists".to_string()))?;

    issue_token_pair(state, &user).await
}

/// Rotates a refresh token: the presented token is revoked and a fresh pair
/// is issued. Any refresh token is accepted at most once.
pub async fn rotate_refresh_token(
    state: &AppState,
    presented: &str,
) -> Result<TokenPairResponse, AppError> {
    let record =
        RefreshToken::find_active_by_hash(&state.dbpool, &sha256_hex(presented.as_bytes()))
            .await?
            .ok_or_else(|| {
                AppError::Credential("refresh token invalid, expired, or revoked".to_string())
            })?;

    let revoked = RefreshToken::revoke(&state.dbpool, record.id).await?;
    if revoked == 0 {
        // Lost the race with a concurrent rotation of the same token.
        return Err(AppError::Credential(
            "refresh token already rotated".to_string(),
        ));
    }

    let user = User::find_by_id(&state.dbpool, record.user_id)
        .await?
        .ok_or_else(|| AppError::Credential("token owner no longer exists".to_string()))?;

    issue_token_pair(state, &user).await
}

async fn issue_token_pair(state: &AppState, user: &User) -> Result<TokenPairResponse, AppError> {
    let token = JwtManager::issue(
        &state.dbpool,
        user,
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_expiry_hours,
    )
    .await?;

    let refresh = random_token()?;
    RefreshToken::create(
        &state.dbpool,
        user.id,
        &sha256_hex(refresh.as_bytes()),
        Utc::now() + ChronoDuration::days(REFRESH_TTL_DAYS),
    )
    .await?;

    Ok(TokenPairResponse {
        token,
        refresh_token: refresh,
        expires_in: JwtManager::expiration_seconds(state.config.auth.jwt_expiry_hours),
    })
}

/// Redirect URIs must be HTTPS; plain HTTP is tolerated for localhost only.
pub fn validate_redirect_uri(uri: &str) -> Result<(), AppError> {
    if uri.starts_with("https://") {
        return Ok(());
    }
    if let Some(rest) = uri.strip_prefix("http://") {
        let host = rest
            .split(['/', ':', '?'])
            .next()
            .unwrap_or_default();
        if host == "localhost" || host == "127.0.0.1" {
            return Ok(());
        }
    }

    Err(AppError::Policy(
        "redirect URI must use HTTPS".to_string(),
    ))
}

/// Drops every cached credential verification. Called after key revocation
/// and role changes so in-flight bearers re-verify against the store.
pub async fn invalidate_credential_caches(cache: Option<&KvCache>) {
    if let Some(cache) = cache {
        cache.delete_pattern("api_key:*").await;
        cache.delete_pattern("jwt:*").await;
    }
}

// ---------------------------------------------------------------------------
// GitHub OAuth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GithubTokenResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Builds the provider authorize URL for the login redirect. The state
/// parameter carries the (already base64url-encoded) deep-link target.
pub fn github_login_url(state: &AppState, login_state: &str) -> String {
    format!(
        "https://github.com/login/oauth/authorize?client_id={}&redirect_uri={}&scope=read%3Auser%20user%3Aemail&state={}",
        urlencoding::encode(&state.config.github.client_id),
        urlencoding::encode(&state.config.github.redirect_url),
        urlencoding::encode(login_state),
    )
}

/// Completes the GitHub callback: exchanges the code, resolves a verified
/// email, synchronizes the user, and parks the session behind a one-time
/// handoff token for the front-end to collect.
///
/// A fresh API key is minted only when this login created the user; existing
/// users keep whatever keys they already manage.
pub async fn github_callback(state: &AppState, code: &str) -> Result<String, AppError> {
    let access_token = github_exchange_code(state, code).await?;
    let (gh_user, email) = github_fetch_identity(state, &access_token).await?;

    let (user, created) =
        sync_github(&state.dbpool, &gh_user.id.to_string(), &gh_user.login, &email).await?;

    let token = JwtManager::issue(
        &state.dbpool,
        &user,
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_expiry_hours,
    )
    .await?;

    let api_key = if created {
        let (_, plain) = ApiKeyService::issue(&state.dbpool, user.id, "default").await?;
        Some(plain)
    } else {
        None
    };

    state.handoff.insert(token, user, api_key).await
}

async fn github_exchange_code(state: &AppState, code: &str) -> Result<String, AppError> {
    let response = state
        .http
        .post("https://github.com/login/oauth/access_token")
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("client_id", state.config.github.client_id.as_str()),
            ("client_secret", state.config.github.client_secret.as_str()),
            ("code", code),
        ])
        .send()
        .await?;

    let token: GithubTokenResponse = response.json().await?;

    token.access_token.ok_or_else(|| {
        AppError::upstream(format!(
            "code exchange rejected: {}",
            token
                .error_description
                .unwrap_or_else(|| "no detail".to_string())
        ))
    })
}

async fn github_fetch_identity(
    state: &AppState,
    access_token: &str,
) -> Result<(GithubUser, String), AppError> {
    let gh_user: GithubUser = state
        .http
        .get("https://api.github.com/user")
        .header(reqwest::header::USER_AGENT, "arcdata-api")
        .bearer_auth(access_token)
        .send()
        .await?
        .json()
        .await?;

    if let Some(email) = gh_user.email.clone().filter(|e| !e.is_empty()) {
        return Ok((gh_user, email));
    }

    // Profile email hidden: ask for the verified primary, then fall back to
    // the provider's noreply form.
    let emails: Vec<GithubEmail> = state
        .http
        .get("https://api.github.com/user/emails")
        .header(reqwest::header::USER_AGENT, "arcdata-api")
        .bearer_auth(access_token)
        .send()
        .await?
        .json()
        .await
        .unwrap_or_default();

    let email = emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
        .unwrap_or_else(|| format!("{}@users.noreply.github.com", gh_user.login));

    Ok((gh_user, email))
}

/// GitHub variant of federated sync: find by provider id, then by email,
/// then create. Returns whether the user was created by this login.
pub async fn sync_github(
    pool: &SqlitePool,
    github_id: &str,
    login: &str,
    email: &str,
) -> Result<(User, bool), AppError> {
    if let Some(user) = User::find_by_github_id(pool, github_id).await? {
        return Ok((user, false));
    }

    if let Some(user) = User::find_by_email(pool, email).await? {
        let user = User::set_github_id(pool, user.id, github_id).await?;
        return Ok((user, false));
    }

    let user = create_with_username_fallback(
        pool,
        NewUser {
            email,
            username: login,
            role: Role::User,
            github_id: Some(github_id),
            oidc_sub: None,
        },
    )
    .await?;

    Ok((user, true))
}

/// Creates a user, retrying once with the email as username when the
/// preferred name is already taken.
async fn create_with_username_fallback(
    pool: &SqlitePool,
    new_user: NewUser<'_>,
) -> Result<User, AppError> {
    match User::create(pool, new_user.clone()).await {
        Ok(user) => Ok(user),
        Err(_) if new_user.username != new_user.email => {
            User::create(
                pool,
                NewUser {
                    username: new_user.email,
                    ..new_user
                },
            )
            .await
        }
        Err(e) => Err(e),
    }
}

fn email_local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

// ---------------------------------------------------------------------------
// Handoff map
// ---------------------------------------------------------------------------

/// One parked login session awaiting collection by the front-end.
#[derive(Debug, Clone)]
pub struct HandoffEntry {
    pub token: String,
    pub user: User,
    pub api_key: Option<String>,
    created_at: Instant,
}

/// In-process store bridging the OAuth callback redirect and the front-end's
/// exchange call. Entries are one-time: the exchange pops them. A sweeper
/// clears anything older than ten minutes.
///
/// Single-replica by construction; a multi-replica deployment would move
/// this into the shared cache.
#[derive(Default, Clone)]
pub struct HandoffStore {
    entries: Arc<RwLock<HashMap<String, HandoffEntry>>>,
}

impl HandoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a session and returns its one-time handoff token.
    pub async fn insert(
        &self,
        token: String,
        user: User,
        api_key: Option<String>,
    ) -> Result<String, AppError> {
        let handoff = random_token()?;

        let mut entries = self.entries.write().await;
        entries.insert(
            handoff.clone(),
            HandoffEntry {
                token,
                user,
                api_key,
                created_at: Instant::now(),
            },
        );

        Ok(handoff)
    }

    /// Pops an entry. A second call with the same token finds nothing.
    pub async fn take(&self, handoff: &str) -> Option<HandoffEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries.remove(handoff)?;

        if entry.created_at.elapsed() > HANDOFF_MAX_AGE {
            return None;
        }
        Some(entry)
    }

    /// Drops expired entries.
    pub async fn sweep(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() <= HANDOFF_MAX_AGE);
        let swept = before - entries.len();
        if swept > 0 {
            tracing::debug!(swept, "swept expired handoff entries");
        }
    }

    /// Runs the periodic sweeper until the process exits.
    pub fn spawn_sweeper(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HANDOFF_SWEEP_INTERVAL);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                store.sweep().await;
            }
        });
    }
}
