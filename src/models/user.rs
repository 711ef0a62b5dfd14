//! User model and authentication data structures
//!
//! Defines the core user types for authentication and authorization,
//! including database representations and request/response DTOs. Users are
//! created on first federated login or by admin bootstrap, never deleted
//! silently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::AppError;

/// Access role. Admins hold write and management access; everyone else reads.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    sqlx::Type,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    #[strum(serialize = "user")]
    User,
    #[strum(serialize = "admin")]
    Admin,
}

/// Database representation of a user
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oidc_sub: Option<String>,
    pub role: Role,
    pub can_access_data: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Federated identity fields captured at user creation.
#[derive(Debug, Default, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub role: Role,
    pub github_id: Option<&'a str>,
    pub oidc_sub: Option<&'a str>,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Find user by internal id
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, AppError> {
        sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Find user by email
    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Self>, AppError> {
        sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Find user by GitHub account id
    pub async fn find_by_github_id(
        pool: &SqlitePool,
        github_id: &str,
    ) -> Result<Option<Self>, AppError> {
        sqlx::query_as("SELECT * FROM users WHERE github_id = $1")
            .bind(github_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Find user by OIDC subject
    pub async fn find_by_oidc_sub(
        pool: &SqlitePool,
        oidc_sub: &str,
    ) -> Result<Option<Self>, AppError> {
        sqlx::query_as("SELECT * FROM users WHERE oidc_sub = $1")
            .bind(oidc_sub)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Create a new user
    pub async fn create(pool: &SqlitePool, new_user: NewUser<'_>) -> Result<Self, AppError> {
        sqlx::query_as(
            "INSERT INTO users (email, username, role, github_id, oidc_sub) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(new_user.email)
        .bind(new_user.username)
        .bind(new_user.role)
        .bind(new_user.github_id)
        .bind(new_user.oidc_sub)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Change a user's role; returns the updated row.
    pub async fn update_role(pool: &SqlitePool, id: i64, role: Role) -> Result<Self, AppError> {
        sqlx::query_as(
            "UPDATE users SET role = $1, updated_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(role)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Attach a GitHub id discovered during a later federated login.
    pub async fn set_github_id(
        pool: &SqlitePool,
        id: i64,
        github_id: &str,
    ) -> Result<Self, AppError> {
        sqlx::query_as(
            "UPDATE users SET github_id = $1, updated_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(github_id)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Attach an OIDC subject discovered during a later federated login.
    pub async fn set_oidc_sub(
        pool: &SqlitePool,
        id: i64,
        oidc_sub: &str,
    ) -> Result<Self, AppError> {
        sqlx::query_as(
            "UPDATE users SET oidc_sub = $1, updated_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(oidc_sub)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}

/// JWT token claims for locally issued bearers.
///
/// Issuer and audience are pinned to this service so a token minted here is
/// never accepted by, or confused with, a federated one.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer - this service.
    pub iss: String,
    /// Audience - clients of this service.
    pub aud: String,
    /// Subject - the user id this token represents.
    pub sub: String,
    /// Expiration time, Unix seconds.
    pub exp: usize,
    /// Issued at, Unix seconds.
    pub iat: usize,
    /// Unique token id.
    pub jti: String,
    /// Role at issuance time.
    pub role: Role,
}

/// Authenticated caller context carried through request handling.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            role: user.role,
        }
    }
}

/// API-key login request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 16))]
    pub api_key: String,
}

/// Authentication response containing a local JWT
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: User,
}

/// Refresh-token rotation request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 16))]
    pub refresh_token: String,
}

/// Token pair returned by the PKCE and refresh flows
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenPairResponse {
    pub token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// PKCE authorization request issued by an already-authenticated client
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AuthorizeRequest {
    #[validate(length(min = 43, max = 128))]
    pub code_challenge: String,
    /// Either `S256` or `plain`.
    pub code_challenge_method: String,
    #[validate(length(min = 1))]
    pub redirect_uri: String,
}

/// One-time authorization code response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeResponse {
    pub code: String,
    pub expires_in: i64,
}

/// PKCE code exchange request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TokenRequest {
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
}

/// Handoff exchange response after a federated login
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExchangeResponse {
    pub token: String,
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Admin role-change request
#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub role: Role,
}
