//! The `run` command: harvest a target list end to end.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use tokio::sync::mpsc;

use comment_harvest::adapters::AdapterSet;
use comment_harvest::config::Config;
use comment_harvest::error::HarvestError;
use comment_harvest::harvest::{
    CheckpointStore, EventSink, HarvestEngine, HarvestSettings, RunOutcome, RunSummary,
};
use comment_harvest::models::{SourceKind, Target};
use comment_harvest::renderer::{BrowserEngineConfig, PageRenderer};
use comment_harvest::sink::{CsvSink, ErrorLog};
use comment_harvest::targets::{load_targets, run_key_for};

use crate::cli::progress::HarvestProgressBar;
use crate::progress_println;

/// Exit code for a run that stopped on a fatal error.
const EXIT_FATAL: u8 = 1;

/// Exit code for a run stopped at a boundary by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Args)]
pub struct RunArgs {
    /// Target list file, one URL per line
    targets: PathBuf,

    /// Force the site for every line instead of inferring it from the host
    #[arg(long, value_enum)]
    site: Option<SourceKind>,

    /// Checkpoint name (default: target list file stem)
    #[arg(long)]
    run_key: Option<String>,

    /// Rows per durable write
    #[arg(long)]
    batch_size: Option<usize>,

    /// Maximum scroll cycles per target
    #[arg(long)]
    max_cycles: Option<u32>,

    /// Seconds to wait after each scroll
    #[arg(long)]
    cycle_pause: Option<f64>,

    /// Wall-clock cap per target, in seconds
    #[arg(long)]
    max_wall_clock: Option<u64>,

    /// Unchanged counts in a row that end scrolling
    #[arg(long)]
    plateau_threshold: Option<u32>,

    /// Output directory (default: from config)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

impl RunArgs {
    fn settings(&self, config: &Config) -> anyhow::Result<HarvestSettings> {
        let mut limits = config.limits.clone();
        if let Some(batch_size) = self.batch_size {
            limits.batch_size = batch_size;
        }
        if let Some(max_cycles) = self.max_cycles {
            limits.max_cycles = max_cycles;
        }
        if let Some(pause) = self.cycle_pause {
            limits.cycle_pause_secs = pause;
        }
        if let Some(wall_clock) = self.max_wall_clock {
            limits.max_wall_clock_secs = wall_clock;
        }
        if let Some(threshold) = self.plateau_threshold {
            limits.plateau_threshold = threshold;
        }

        Ok(HarvestSettings {
            batch_size: limits.batch_size.max(1),
            limits: limits.stability_limits().map_err(anyhow::Error::msg)?,
            retry: config.retry.policy(),
            output_dir: self
                .output_dir
                .clone()
                .unwrap_or_else(|| config.output_path()),
        })
    }
}

/// Harvest every target, returning the process exit code.
pub async fn cmd_run(config: &Config, args: RunArgs) -> anyhow::Result<ExitCode> {
    let settings = args.settings(config)?;
    let state_dir = config.state_path();
    let run_key = args
        .run_key
        .clone()
        .unwrap_or_else(|| run_key_for(&args.targets));

    let mut store = CheckpointStore::for_run(&state_dir, &run_key, settings.retry);
    let error_log = ErrorLog::in_dir(&state_dir);

    let targets = match load_targets(&args.targets, args.site) {
        Ok(targets) => targets,
        Err(e) => {
            error_log.record(&format!("Startup failed: {}", e));
            // A bad line must not throw away progress on the lines before it.
            if e.is_unreadable() {
                reset_after_startup_failure(&mut store).await;
            }
            return Err(e).context("Cannot read target list");
        }
    };

    println!(
        "{} {} targets from {} (checkpoint {})",
        style("→").cyan(),
        targets.len(),
        args.targets.display(),
        store.path().display()
    );

    let mut browser = config.browser.clone();
    if args.headed {
        browser.headless = false;
    }

    launch_and_harvest(config, browser, store, error_log, settings, &targets, !args.no_progress).await
}

#[cfg(feature = "browser")]
async fn launch_and_harvest(
    config: &Config,
    browser: BrowserEngineConfig,
    mut store: CheckpointStore,
    error_log: ErrorLog,
    settings: HarvestSettings,
    targets: &[Target],
    show_progress: bool,
) -> anyhow::Result<ExitCode> {
    let renderer = match comment_harvest::renderer::ChromeRenderer::launch(browser).await {
        Ok(renderer) => renderer,
        Err(e) => {
            error_log.record(&format!("Startup failed: {}", e));
            reset_after_startup_failure(&mut store).await;
            return Err(e).context("Cannot start browser");
        }
    };

    let adapters = AdapterSet::new(config.steam.clone());
    harvest(renderer, store, error_log, adapters, settings, targets, show_progress).await
}

#[cfg(not(feature = "browser"))]
async fn launch_and_harvest(
    _config: &Config,
    _browser: BrowserEngineConfig,
    mut store: CheckpointStore,
    error_log: ErrorLog,
    _settings: HarvestSettings,
    _targets: &[Target],
    _show_progress: bool,
) -> anyhow::Result<ExitCode> {
    error_log.record("Startup failed: browser support not compiled");
    reset_after_startup_failure(&mut store).await;
    anyhow::bail!("Browser support not compiled. Rebuild with --features browser")
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
async fn harvest<R: PageRenderer>(
    renderer: R,
    store: CheckpointStore,
    error_log: ErrorLog,
    adapters: AdapterSet,
    settings: HarvestSettings,
    targets: &[Target],
    show_progress: bool,
) -> anyhow::Result<ExitCode> {
    let output_dir = settings.output_dir.clone();
    let error_log_path = error_log.path().to_path_buf();

    let (events, display) = if show_progress {
        let (tx, rx) = mpsc::channel(64);
        (EventSink::new(tx), Some(HarvestProgressBar::spawn(rx)))
    } else {
        (EventSink::none(), None)
    };

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
            progress_println!(
                "{} Stop requested; finishing the current batch...",
                style("!").yellow()
            );
        }
    });

    let mut engine = HarvestEngine::new(renderer, CsvSink::new(), store, error_log, adapters, settings)
        .with_events(events)
        .with_stop_flag(stop);

    let outcome = engine.run(targets).await;

    let (mut renderer, _, store) = engine.into_parts();
    if let Err(e) = renderer.close().await {
        tracing::warn!("Failed to close browser: {}", e);
    }
    if let Some(display) = display {
        display.finish().await;
    }

    match &outcome {
        Ok(RunOutcome::Done(summary)) => {
            print_summary(summary, &output_dir);
            println!("{} All targets done", style("✓").green());
        }
        Ok(RunOutcome::Interrupted(summary)) => {
            print_summary(summary, &output_dir);
            println!(
                "{} Interrupted. Progress saved to {}; run again to resume.",
                style("!").yellow(),
                store.path().display()
            );
        }
        Err(e) => {
            eprintln!("{} {}", style("✗").red(), e);
            eprintln!(
                "  Progress kept in {}; details in {}",
                store.path().display(),
                error_log_path.display()
            );
        }
    }
    Ok(ExitCode::from(exit_status(&outcome)))
}

/// Process exit status for how a run ended.
fn exit_status(outcome: &Result<RunOutcome, HarvestError>) -> u8 {
    match outcome {
        Ok(RunOutcome::Done(_)) => 0,
        Ok(RunOutcome::Interrupted(_)) => EXIT_INTERRUPTED,
        Err(_) => EXIT_FATAL,
    }
}

async fn reset_after_startup_failure(store: &mut CheckpointStore) {
    if let Err(e) = store.reset().await {
        tracing::warn!("Failed to reset checkpoint {}: {}", store.path().display(), e);
    }
}

fn print_summary(summary: &RunSummary, output_dir: &Path) {
    if summary.already_done > 0 {
        println!(
            "  {} targets already done in an earlier run",
            summary.already_done
        );
    }
    println!(
        "  Completed: {} | Empty: {} | Failed: {}",
        style(summary.completed).green(),
        style(summary.empty).yellow(),
        style(summary.failed).red()
    );
    println!(
        "  Rows written: {} ({} units failed) in {}",
        style(summary.rows_written).cyan(),
        summary.units_failed,
        output_dir.display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::ffi::OsStr;
    use std::time::Duration;

    use comment_harvest::error::RendererError;
    use comment_harvest::harvest::read_progress;
    use comment_harvest::models::HarvestProgress;
    use comment_harvest::retry::RetryPolicy;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn test_flags_override_config() {
        let wrapper = Wrapper::parse_from([
            "harvest",
            "lists/games.txt",
            "--batch-size",
            "25",
            "--cycle-pause",
            "0.5",
            "--site",
            "taptap",
        ]);
        let settings = wrapper.args.settings(&Config::default()).unwrap();
        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.limits.cycle_pause, Duration::from_millis(500));
        assert_eq!(settings.limits.max_cycles, 500);
        assert_eq!(wrapper.args.site, Some(SourceKind::TapTap));
    }

    #[test]
    fn test_infinite_cycle_pause_is_a_cli_error() {
        let wrapper = Wrapper::parse_from(["harvest", "list.txt", "--cycle-pause", "inf"]);
        let err = wrapper.args.settings(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("Invalid cycle pause"));
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(&Ok(RunOutcome::Done(RunSummary::default()))), 0);
        assert_eq!(
            exit_status(&Ok(RunOutcome::Interrupted(RunSummary::default()))),
            EXIT_INTERRUPTED
        );
        let fatal = HarvestError::SessionLost(RendererError::SessionLost("window closed".to_string()));
        assert_eq!(exit_status(&Err(fatal)), EXIT_FATAL);
    }

    fn config_in(dir: &Path) -> Config {
        Config {
            state_dir: dir.join("logs").to_string_lossy().into_owned(),
            output_dir: dir.join("out").to_string_lossy().into_owned(),
            ..Config::default()
        }
    }

    async fn saved_progress(config: &Config, run_key: &str) -> HarvestProgress {
        let mut store = CheckpointStore::for_run(&config.state_path(), run_key, RetryPolicy::default());
        let mut progress = HarvestProgress::default();
        progress.complete_target("1");
        progress.unit_cursor = 40;
        progress.sequence_cursor = 40;
        progress.last_target_key = "2".to_string();
        store.save(&progress).await.unwrap();
        progress
    }

    #[tokio::test]
    async fn test_bad_line_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let before = saved_progress(&config, "games").await;

        let list = dir.path().join("games.txt");
        std::fs::write(
            &list,
            "https://store.steampowered.com/app/1/\n\
             https://store.steampowered.com/app/2/\n\
             https://www.example.org/typo\n",
        )
        .unwrap();

        let wrapper = Wrapper::parse_from([OsStr::new("harvest"), list.as_os_str()]);
        let err = cmd_run(&config, wrapper.args).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Line 3"));

        let path = config.state_path().join("games.progress.json");
        assert_eq!(read_progress(&path), before);
    }

    #[tokio::test]
    async fn test_missing_list_resets_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        saved_progress(&config, "games").await;

        let list = dir.path().join("games.txt");
        let wrapper = Wrapper::parse_from([OsStr::new("harvest"), list.as_os_str()]);
        assert!(cmd_run(&config, wrapper.args).await.is_err());

        let path = config.state_path().join("games.progress.json");
        assert!(read_progress(&path).is_default());
    }
}
