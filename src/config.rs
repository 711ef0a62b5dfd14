//! Server configuration management with multi-source support
//!
//! Supports configuration via CLI arguments, TOML files, and environment
//! variables with clear precedence rules. Includes utilities for generating
//! default configuration files and startup validation.
//!
//! The assembled [`ApiConfig`] is immutable for the lifetime of the process;
//! it is built once at startup and shared behind an `Arc`. Nothing re-reads
//! process-wide state on the hot path.
//!
//! # Configuration Sources (highest to lowest precedence)
//! 1. Environment files (.env)
//! 2. TOML configuration files
//! 3. CLI arguments (default)

use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr, path::PathBuf, str::FromStr};

use crate::cli::Cli;
use crate::error::AppError;

/// Main API configuration structure containing all runtime settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub address: IpAddr,
    pub port: u16,
    pub database_url: String,
    /// `redis://...`, `memory`, or empty (cache disabled).
    #[serde(default)]
    pub cache_url: String,
    /// Origins allowed for CORS and folded into the CSP header.
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub openapi: OpenApiDocs,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub github: GithubSettings,
    #[serde(default)]
    pub oidc: OidcSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub source: SourceRepoSettings,
}

/// File format types for configuration file generation
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum FileKind {
    /// TOML configuration file format
    Toml,
    /// Environment variable file format
    EnvFile,
}

fn default_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

/// Local token issuance and verification settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthSettings {
    /// HS256 signing secret. Must be overridden in production.
    pub jwt_secret: String,
    /// Local JWT lifetime in hours.
    pub jwt_expiry_hours: i64,
    /// Federated group that grants the admin role on sync.
    pub admin_group: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: "default_jwt_secret_change_in_production".to_string(),
            jwt_expiry_hours: 24,
            admin_group: "arcdb-admins".to_string(),
        }
    }
}

/// GitHub OAuth application settings. Empty client id disables the provider.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct GithubSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    /// Front-end URL that receives the one-time handoff token.
    pub frontend_callback_url: String,
}

impl GithubSettings {
    pub fn enabled(&self) -> bool {
        !self.client_id.is_empty()
    }
}

/// OIDC federation settings. Empty issuer disables OIDC verification.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct OidcSettings {
    pub issuer: String,
    pub jwks_url: String,
    /// Expected audience (the client id registered with the provider).
    pub audience: String,
    pub userinfo_url: String,
}

impl OidcSettings {
    pub fn enabled(&self) -> bool {
        !self.issuer.is_empty()
    }
}

/// Inbound fixed-window admission settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitSettings {
    /// Requests admitted per identifier per window.
    pub limit: u64,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Reserved for a future token-bucket variant.
    pub burst: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 21,
            window_secs: 60,
            burst: 8,
        }
    }
}

/// Ingestion scheduling settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncSettings {
    /// 5-field cron expression in UTC.
    pub cron: String,
    pub enabled: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cron: "*/15 * * * *".to_string(),
            enabled: true,
        }
    }
}

impl SyncSettings {
    /// Parses the configured expression into a [`Schedule`].
    ///
    /// The cron crate wants a seconds field; the conventional 5-field form is
    /// accepted and pinned to second zero.
    pub fn schedule(&self) -> Result<Schedule, AppError> {
        let expr = self.cron.trim();
        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };

        Schedule::from_str(&normalized)
            .map_err(|e| AppError::Input(format!("invalid cron expression '{expr}': {e}")))
    }
}

/// Source repository for game-data ingestion (GitHub raw content).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SourceRepoSettings {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl Default for SourceRepoSettings {
    fn default() -> Self {
        Self {
            owner: "arc-raiders-community".to_string(),
            repo: "arc-data".to_string(),
            branch: "main".to_string(),
        }
    }
}

impl SourceRepoSettings {
    /// Base URL for raw file fetches.
    pub fn raw_base(&self) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}",
            self.owner, self.repo, self.branch
        )
    }

    /// Absolute URL for an item image filename.
    pub fn item_image_url(&self, filename: &str) -> String {
        format!(
            "{}/images/items/{}",
            self.raw_base(),
            urlencoding::encode(filename)
        )
    }
}

impl ApiConfig {
    /// Generates a configuration file with default values
    ///
    /// Creates either a TOML config file or environment variable file
    /// based on the specified `FileKind`. Used by CLI commands.
    pub fn gen_file(file: &PathBuf, kind: FileKind) -> Result<(), anyhow::Error> {
        use std::fs::File;
        use std::io::prelude::*;

        let default_configs = Self::default();

        let what_file = match kind {
            FileKind::Toml => toml::to_string(&default_configs)?,
            FileKind::EnvFile => Self::to_string(&default_configs),
        };

        let mut buffer = File::create(file)?;
        buffer.write_all(what_file.as_bytes())?;

        println!("configuration file '{file:?}' created successfully");

        Ok(())
    }

    /// Creates ApiConfig from CLI arguments with source precedence handling
    ///
    /// Configuration source priority (highest to lowest):
    /// 1. Environment file (--env-file flag)
    /// 2. TOML configuration file (--config flag)
    /// 3. Direct command-line arguments (default)
    pub fn from_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        if let Some(file) = &cli.cfg.env_file {
            Self::from_env_file(file)
        } else if let Some(file) = &cli.cfg.config {
            Self::from_config_file(file)
        } else {
            Self::from_cli_args(cli)
        }
    }

    /// Creates ApiConfig from an environment variable file.
    ///
    /// Binding and database settings are required; everything else falls back
    /// to defaults so a minimal .env stays minimal.
    pub fn from_env_file(file: &PathBuf) -> Result<Self, anyhow::Error> {
        dotenvy::from_filename_override(file)?;

        let defaults = Self::default();

        Ok(Self {
            address: IpAddr::from_str(&dotenvy::var("BIND_ADDR")?)?,
            port: u16::from_str(&dotenvy::var("BIND_PORT")?)?,
            database_url: dotenvy::var("DATABASE_URL")?,
            cache_url: env_or("CACHE_URL", &defaults.cache_url),
            allowed_origins: parse_origins(&env_or(
                "ALLOWED_ORIGINS",
                &defaults.allowed_origins.join(","),
            )),
            openapi: OpenApiDocs {
                enable_swagger_ui: env_bool("ENABLE_SWAGGER_UI", false),
                enable_redoc: env_bool("ENABLE_REDOC", false),
                enable_scalar: env_bool("ENABLE_SCALAR", false),
                enable_rapidoc: env_bool("ENABLE_RAPIDOC", false),
            },
            auth: AuthSettings {
                jwt_secret: env_or("JWT_SECRET", &defaults.auth.jwt_secret),
                jwt_expiry_hours: env_parse("JWT_EXPIRY_HOURS", defaults.auth.jwt_expiry_hours),
                admin_group: env_or("ADMIN_GROUP", &defaults.auth.admin_group),
            },
            github: GithubSettings {
                client_id: env_or("GITHUB_CLIENT_ID", ""),
                client_secret: env_or("GITHUB_CLIENT_SECRET", ""),
                redirect_url: env_or("GITHUB_REDIRECT_URL", ""),
                frontend_callback_url: env_or("FRONTEND_CALLBACK_URL", ""),
            },
            oidc: OidcSettings {
                issuer: env_or("OIDC_ISSUER", ""),
                jwks_url: env_or("OIDC_JWKS_URL", ""),
                audience: env_or("OIDC_AUDIENCE", ""),
                userinfo_url: env_or("OIDC_USERINFO_URL", ""),
            },
            rate_limit: RateLimitSettings {
                limit: env_parse("RATE_LIMIT", defaults.rate_limit.limit),
                window_secs: env_parse("RATE_WINDOW_SECS", defaults.rate_limit.window_secs),
                burst: env_parse("RATE_BURST", defaults.rate_limit.burst),
            },
            sync: SyncSettings {
                cron: env_or("SYNC_CRON", &defaults.sync.cron),
                enabled: env_bool("SYNC_ENABLED", defaults.sync.enabled),
            },
            source: SourceRepoSettings {
                owner: env_or("SOURCE_OWNER", &defaults.source.owner),
                repo: env_or("SOURCE_REPO", &defaults.source.repo),
                branch: env_or("SOURCE_BRANCH", &defaults.source.branch),
            },
        })
    }

    /// Creates ApiConfig from TOML configuration file
    pub fn from_config_file(file: &PathBuf) -> Result<Self, anyhow::Error> {
        let file_content = std::fs::read_to_string(file)?;
        let my_configs: Self = toml::from_str(&file_content)?;

        Ok(my_configs)
    }

    /// Creates ApiConfig directly from command-line arguments
    ///
    /// Uses CLI argument values plus defaults; `JWT_SECRET` is still honored
    /// from the process environment so the secret never appears in argv.
    pub fn from_cli_args(cli: &Cli) -> Result<Self, anyhow::Error> {
        let defaults = Self::default();

        Ok(Self {
            address: cli.arg.address,
            port: cli.arg.port,
            database_url: cli.arg.database_url.clone(),
            cache_url: cli.arg.cache_url.clone(),
            allowed_origins: if cli.arg.allowed_origins.is_empty() {
                defaults.allowed_origins.clone()
            } else {
                cli.arg.allowed_origins.clone()
            },
            openapi: cli.arg.docs(),
            auth: AuthSettings {
                jwt_secret: std::env::var("JWT_SECRET")
                    .unwrap_or_else(|_| defaults.auth.jwt_secret.clone()),
                ..defaults.auth.clone()
            },
            sync: SyncSettings {
                cron: cli
                    .arg
                    .sync_cron
                    .clone()
                    .unwrap_or_else(|| defaults.sync.cron.clone()),
                enabled: !cli.arg.no_sync,
            },
            ..defaults
        })
    }

    /// Startup validation: fail fast on settings the server cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(AppError::Input("JWT secret must not be empty".to_string()));
        }
        if self.auth.jwt_expiry_hours <= 0 {
            return Err(AppError::Input(
                "JWT expiry must be a positive number of hours".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(AppError::Input(
                "rate limit window must be at least one second".to_string(),
            ));
        }
        // Surfaces a bad cron expression at boot instead of first tick.
        self.sync.schedule()?;

        if self.auth.jwt_secret == AuthSettings::default().jwt_secret {
            tracing::warn!("running with the default JWT secret; override it in production");
        }

        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    dotenvy::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    dotenvy::var(key)
        .ok()
        .and_then(|v| bool::from_str(&v).ok())
        .unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    dotenvy::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Splits a comma-separated origin list, dropping empty segments.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Formats ApiConfig as environment variable file content
impl fmt::Display for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "BIND_ADDR=\"{}\"\nBIND_PORT={}\nDATABASE_URL={}\nCACHE_URL={}\nALLOWED_ORIGINS={}\n\n\
             # Auth\nJWT_SECRET={}\nJWT_EXPIRY_HOURS={}\nADMIN_GROUP={}\n\n\
             # GitHub OAuth\nGITHUB_CLIENT_ID={}\nGITHUB_CLIENT_SECRET={}\nGITHUB_REDIRECT_URL={}\nFRONTEND_CALLBACK_URL={}\n\n\
             # OIDC\nOIDC_ISSUER={}\nOIDC_JWKS_URL={}\nOIDC_AUDIENCE={}\nOIDC_USERINFO_URL={}\n\n\
             # Rate limiting\nRATE_LIMIT={}\nRATE_WINDOW_SECS={}\nRATE_BURST={}\n\n\
             # Ingestion\nSYNC_CRON=\"{}\"\nSYNC_ENABLED={}\nSOURCE_OWNER={}\nSOURCE_REPO={}\nSOURCE_BRANCH={}\n\n{}",
            self.address,
            self.port,
            self.database_url,
            self.cache_url,
            self.allowed_origins.join(","),
            self.auth.jwt_secret,
            self.auth.jwt_expiry_hours,
            self.auth.admin_group,
            self.github.client_id,
            self.github.client_secret,
            self.github.redirect_url,
            self.github.frontend_callback_url,
            self.oidc.issuer,
            self.oidc.jwks_url,
            self.oidc.audience,
            self.oidc.userinfo_url,
            self.rate_limit.limit,
            self.rate_limit.window_secs,
            self.rate_limit.burst,
            self.sync.cron,
            self.sync.enabled,
            self.source.owner,
            self.source.repo,
            self.source.branch,
            self.openapi
        )
    }
}

/// Provides default configuration values for development and testing
impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            address: IpAddr::from_str("0.0.0.0").unwrap(),
            port: 8080,
            database_url: "sqlite:arcdata.db".to_string(),
            cache_url: String::new(),
            allowed_origins: default_origins(),
            openapi: OpenApiDocs::default(),
            auth: AuthSettings::default(),
            github: GithubSettings::default(),
            oidc: OidcSettings::default(),
            rate_limit: RateLimitSettings::default(),
            sync: SyncSettings::default(),
            source: SourceRepoSettings::default(),
        }
    }
}

/// OpenAPI documentation interface configuration
///
/// Controls which API documentation interfaces are enabled.
/// Multiple interfaces can be enabled simultaneously.
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
pub struct OpenApiDocs {
    pub enable_swagger_ui: bool,
    pub enable_redoc: bool,
    pub enable_scalar: bool,
    pub enable_rapidoc: bool,
}

/// Formats OpenApiDocs as environment variable section
impl fmt::Display for OpenApiDocs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "# OpenAPI Docs\nENABLE_SWAGGER_UI={}\nENABLE_REDOC={}\nENABLE_SCALAR={}\nENABLE_RAPIDOC={}\n",
            self.enable_swagger_ui, self.enable_redoc, self.enable_scalar, self.enable_rapidoc
        )
    }
}
