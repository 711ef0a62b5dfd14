//! Command-line interface
//!
//! The binary serves the gateway by default; subcommands generate starter
//! configuration files or run a single ingestion sync for operators who want
//! to backfill outside the cron schedule. Serve settings can come straight
//! from flags, or wholesale from a TOML/env file, but not both at once.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::OpenApiDocs;

/// Top-level parser: file-based configuration, direct serve flags, and the
/// operational subcommands.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    /// File-based configuration sources
    pub cfg: ConfigFiles,

    #[command(flatten)]
    /// Direct serve settings
    pub arg: ServeArgs,

    /// Commands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Operational subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generates a TOML configuration file with default values
    GenConfig {
        /// Configuration file name
        #[arg(default_value = "config.toml")]
        file_name: Option<PathBuf>,
    },
    /// Generates an environment file with default values
    GenEnvFile {
        /// Environment file name
        #[arg(default_value = ".env")]
        file_name: Option<PathBuf>,
    },
    /// Runs one ingestion sync against the source repository, then exits
    Sync,
}

/// Configuration file sources (mutually exclusive with direct serve flags)
#[derive(Args, Debug)]
#[group(id = "cfg", required = false, multiple = false, conflicts_with = "arg")]
pub struct ConfigFiles {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE_NAME")]
    pub config: Option<PathBuf>,

    /// Path to an environment variable file
    #[arg(short, long, value_name = "FILE_NAME")]
    pub env_file: Option<PathBuf>,
}

/// Gateway settings accepted directly on the command line. Anything not
/// settable here (provider secrets, rate limits, the source repository)
/// comes from a configuration file or the environment.
#[derive(Args, Debug)]
#[group(id = "arg", multiple = true, conflicts_with = "cfg")]
pub struct ServeArgs {
    /// IP address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    pub address: IpAddr,

    /// Port number to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Database connection URL
    #[arg(short, long, default_value = "sqlite:arcdata.db")]
    pub database_url: String,

    /// Cache URL: redis://..., "memory", or empty to run uncached
    #[arg(long, default_value = "")]
    pub cache_url: String,

    /// Origin allowed for browser calls; repeat or comma-separate for more
    #[arg(long = "allowed-origin", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// API documentation interfaces to expose, comma-separated
    #[arg(long, value_enum, value_delimiter = ',')]
    pub docs: Vec<DocsInterface>,

    /// Cron expression overriding the ingestion schedule
    #[arg(long)]
    pub sync_cron: Option<String>,

    /// Disable the cron-driven ingestion scheduler
    #[arg(long, default_value_t = false)]
    pub no_sync: bool,
}

/// The documentation front-ends the gateway can serve.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocsInterface {
    SwaggerUi,
    Redoc,
    Scalar,
    Rapidoc,
}

impl ServeArgs {
    /// Folds the requested doc interfaces into the configuration shape.
    pub fn docs(&self) -> OpenApiDocs {
        OpenApiDocs {
            enable_swagger_ui: self.docs.contains(&DocsInterface::SwaggerUi),
            enable_redoc: self.docs.contains(&DocsInterface::Redoc),
            enable_scalar: self.docs.contains(&DocsInterface::Scalar),
            enable_rapidoc: self.docs.contains(&DocsInterface::Rapidoc),
        }
    }
}
