//! CLI commands implementation.

mod outputs;
mod run;
mod state;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use comment_harvest::config::Config;

use run::RunArgs;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Incremental, resumable comment harvester")]
#[command(version)]
pub struct Cli {
    /// Config file (default: discovered comment-harvest.{toml,yaml,json})
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every target in a list, resuming from the last checkpoint
    Run(RunArgs),

    /// Show the saved checkpoint for a run
    Status {
        /// Run key, or the target list file it was derived from
        run: String,
        /// Print the raw checkpoint JSON
        #[arg(long)]
        json: bool,
    },

    /// Start a run over from the first target
    Reset {
        /// Run key, or the target list file it was derived from
        run: String,
    },

    /// List harvested output files
    Outputs {
        /// Output directory (default: from config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from_path(path)
            .await
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => Config::load().await,
    };
    if let Some(ref path) = config.source_path {
        tracing::debug!("Using config file {}", path.display());
    }

    match cli.command {
        Commands::Run(args) => run::cmd_run(&config, args).await,
        Commands::Status { run, json } => {
            state::cmd_status(&config, &run, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reset { run } => {
            state::cmd_reset(&config, &run).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Outputs { dir } => {
            let dir = dir.unwrap_or_else(|| config.output_path());
            outputs::cmd_outputs(&dir)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
