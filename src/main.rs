//! harvest - incremental comment harvester.
//!
//! Scrolls review and video pages until their comment lists are exhausted
//! and writes every comment to CSV, resuming interrupted runs from the
//! last checkpoint.

mod cli;

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "comment_harvest=info,harvest=info"
    } else {
        "comment_harvest=warn,harvest=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
