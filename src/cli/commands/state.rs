//! Checkpoint inspection and reset.

use std::path::Path;

use console::style;

use comment_harvest::config::Config;
use comment_harvest::harvest::{read_progress, CheckpointStore};
use comment_harvest::targets::run_key_for;

fn store_for(config: &Config, run: &str) -> CheckpointStore {
    CheckpointStore::for_run(
        &config.state_path(),
        &run_key_for(Path::new(run)),
        config.retry.policy(),
    )
}

/// Show the saved checkpoint for a run.
pub async fn cmd_status(config: &Config, run: &str, json: bool) -> anyhow::Result<()> {
    let store = store_for(config, run);
    let progress = read_progress(store.path());

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    println!("{} {}", style("Checkpoint").bold(), store.path().display());
    if !store.path().exists() {
        println!("  {} No checkpoint yet", style("!").yellow());
        return Ok(());
    }
    if progress.is_default() {
        println!("  Nothing in progress; the next run starts at the first target");
        return Ok(());
    }

    println!(
        "  Targets done:   {}",
        style(progress.target_index).cyan()
    );
    if progress.last_target_key.is_empty() {
        return Ok(());
    }
    println!("  Last target:    {}", progress.last_target_key);
    if progress.unit_cursor > 0 || progress.sub_unit_cursor > 0 {
        println!(
            "  Resume at unit: {} (item {}, {} rows written)",
            progress.unit_cursor + 1,
            progress.sub_unit_cursor,
            progress.sequence_cursor
        );
    }
    Ok(())
}

/// Write the zero checkpoint so the next run starts from the first target.
pub async fn cmd_reset(config: &Config, run: &str) -> anyhow::Result<()> {
    let mut store = store_for(config, run);
    store.reset().await?;
    println!(
        "{} Reset checkpoint {}",
        style("✓").green(),
        store.path().display()
    );
    Ok(())
}
