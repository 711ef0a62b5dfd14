//! ARC Data API Binary
//!
//! This is the main binary entry point for the gateway built with Axum. The
//! core application logic is implemented in the library crate for better
//! testability and reusability.
//!
//! ## Usage
//!
//! The API comes with a comprehensive help menu:
//!
//! ```non_rust
//! arcdata-api -h
//! ```

use clap::Parser;

use arcdata_api::{cli, error::AppError, run_app};

/// Minimal main function - just parse CLI args and delegate to library
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = cli::Cli::parse();
    run_app(cli).await
}
