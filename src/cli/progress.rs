//! Progress bar fed from the harvest engine's event channel.
//!
//! Also provides global progress context for coordinating output from
//! any part of the application during progress display.

use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use comment_harvest::harvest::{HarvestEvent, HarvestPhase};

/// Bar length; event fractions are scaled onto it.
const SCALE: u64 = 1000;

/// Global reference to active progress display for coordinating output.
static ACTIVE_PROGRESS: OnceLock<RwLock<Option<MultiProgress>>> = OnceLock::new();

fn get_active_progress() -> &'static RwLock<Option<MultiProgress>> {
    ACTIVE_PROGRESS.get_or_init(|| RwLock::new(None))
}

/// Set the global active progress display.
pub fn set_active_progress(multi: Option<MultiProgress>) {
    if let Ok(mut guard) = get_active_progress().write() {
        *guard = multi;
    }
}

/// Print a message that coordinates with any active progress display.
/// Falls back to println! if no progress display is active.
pub fn progress_println(message: &str) {
    if let Ok(guard) = get_active_progress().read() {
        if let Some(ref multi) = *guard {
            let _ = multi.println(message);
            return;
        }
    }
    println!("{}", message);
}

/// Macro for printing that coordinates with progress display.
#[macro_export]
macro_rules! progress_println {
    ($($arg:tt)*) => {
        $crate::cli::progress::progress_println(&format!($($arg)*))
    };
}

/// Single overall bar plus per-target result lines.
pub struct HarvestProgressBar {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl HarvestProgressBar {
    /// Start consuming `events`. The task ends when every sender is dropped.
    pub fn spawn(mut events: mpsc::Receiver<HarvestEvent>) -> Self {
        let multi = MultiProgress::new();
        let bar = multi.add(ProgressBar::new(SCALE));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {wide_msg} [{bar:30.cyan/blue}] {percent:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message("Starting");

        set_active_progress(Some(multi));

        let task_bar = bar.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                apply(&task_bar, &event);
            }
        });

        Self { bar, task }
    }

    /// Wait for the event stream to end and clear the display.
    pub async fn finish(self) {
        let _ = self.task.await;
        self.bar.finish_and_clear();
        set_active_progress(None);
    }
}

fn apply(bar: &ProgressBar, event: &HarvestEvent) {
    bar.set_position((event.fraction * SCALE as f64).round() as u64);

    let line = match event.phase {
        HarvestPhase::TargetCompleted => Some(format!("{} {}", style("✓").green(), event.message)),
        HarvestPhase::TargetSkipped => Some(format!("{} {}", style("-").yellow(), event.message)),
        HarvestPhase::TargetFailed => Some(format!("{} {}", style("✗").red(), event.message)),
        _ => None,
    };
    if let Some(line) = line {
        bar.println(line);
    }

    bar.set_message(truncate_message(
        &format!("{}: {}", event.phase.as_str(), event.message),
        60,
    ));
}

/// Truncate a status message for display.
fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let kept: String = message.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("navigating: steam 1295660", 40), "navigating: steam 1295660");
        assert_eq!(truncate_message("extracting: 某某视频评论", 16), "extracting: 某...");
    }

    #[test]
    fn test_apply_scales_fraction() {
        let bar = ProgressBar::hidden();
        bar.set_length(SCALE);
        apply(
            &bar,
            &HarvestEvent {
                phase: HarvestPhase::Extracting,
                fraction: 0.25,
                message: "BV1: 10 rows saved".to_string(),
            },
        );
        assert_eq!(bar.position(), 250);
    }
}
