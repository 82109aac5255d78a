//! Decides when an infinite-scroll page has stopped revealing comments.
//!
//! Pages load comments asynchronously with no "done" signal, so the
//! detector scrolls, waits and counts until the count plateaus or a cap is
//! hit. A page that never shows a single unit is reported as
//! [`StableReason::ZeroFound`], distinct from a plateau.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::SiteAdapter;
use crate::error::{RendererError, StabilityError};
use crate::renderer::PageRenderer;

pub const DEFAULT_MAX_CYCLES: u32 = 500;
pub const DEFAULT_CYCLE_PAUSE: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_WALL_CLOCK: Duration = Duration::from_secs(1800);
pub const DEFAULT_PLATEAU_THRESHOLD: u32 = 3;
pub const DEFAULT_ZERO_GRACE_CHECKS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityLimits {
    pub max_cycles: u32,
    pub cycle_pause: Duration,
    /// Soft per-target cap; checked between cycles.
    pub max_wall_clock: Duration,
    /// Consecutive unchanged counts needed to call the page stable.
    pub plateau_threshold: u32,
    /// Extra checks, each after twice the cycle pause, before giving up on
    /// a page that shows no comments at all.
    pub zero_grace_checks: u32,
}

impl StabilityLimits {
    /// Wait before each zero-count grace check.
    pub fn grace_pause(&self) -> Duration {
        self.cycle_pause.saturating_mul(2)
    }
}

impl Default for StabilityLimits {
    fn default() -> Self {
        Self {
            max_cycles: DEFAULT_MAX_CYCLES,
            cycle_pause: DEFAULT_CYCLE_PAUSE,
            max_wall_clock: DEFAULT_MAX_WALL_CLOCK,
            plateau_threshold: DEFAULT_PLATEAU_THRESHOLD,
            zero_grace_checks: DEFAULT_ZERO_GRACE_CHECKS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableReason {
    Plateau,
    CycleCap,
    TimeCap,
    ZeroFound,
}

impl StableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plateau => "plateau",
            Self::CycleCap => "cycle_cap",
            Self::TimeCap => "time_cap",
            Self::ZeroFound => "zero_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableResult {
    pub final_count: usize,
    pub reason: StableReason,
    /// Scroll cycles run, not counting zero-content grace checks.
    pub cycles: u32,
    /// Unit selector that produced the final count.
    pub selector: Option<String>,
}

/// Count comment units using the first adapter selector that matches anything.
pub async fn count_units<R>(
    renderer: &mut R,
    adapter: &dyn SiteAdapter,
) -> Result<(usize, Option<String>), RendererError>
where
    R: PageRenderer + ?Sized,
{
    for selector in adapter.unit_selectors() {
        let count = renderer.count(selector).await?;
        if count > 0 {
            return Ok((count, Some(selector.to_string())));
        }
    }
    Ok((0, None))
}

/// Count units, turning anything but a lost session into `None`.
async fn observe<R>(
    renderer: &mut R,
    adapter: &dyn SiteAdapter,
) -> Result<Option<(usize, Option<String>)>, StabilityError>
where
    R: PageRenderer + ?Sized,
{
    match count_units(renderer, adapter).await {
        Ok(observed) => Ok(Some(observed)),
        Err(e) if e.is_session_lost() => Err(StabilityError::RendererUnavailable(e)),
        Err(e) => {
            warn!("Counting comment units failed: {}", e);
            Ok(None)
        }
    }
}

async fn scroll<R>(renderer: &mut R) -> Result<(), StabilityError>
where
    R: PageRenderer + ?Sized,
{
    match renderer.scroll_to_bottom().await {
        Ok(()) => Ok(()),
        Err(e) if e.is_session_lost() => Err(StabilityError::RendererUnavailable(e)),
        Err(e) => {
            warn!("Scroll failed: {}", e);
            Ok(())
        }
    }
}

/// Scroll until the unit count plateaus or a limit is reached.
///
/// Only fails when the renderer session is gone. Any other renderer error
/// during a cycle is logged and the cycle counts as unchanged.
pub async fn await_stable<R>(
    renderer: &mut R,
    adapter: &dyn SiteAdapter,
    limits: &StabilityLimits,
) -> Result<StableResult, StabilityError>
where
    R: PageRenderer + ?Sized,
{
    let start = Instant::now();
    let threshold = limits.plateau_threshold.max(1);

    let mut cycles: u32 = 0;
    let mut previous: Option<usize> = None;
    let mut unchanged: u32 = 0;
    let mut max_seen: usize = 0;
    let mut selector: Option<String> = None;
    let mut grace_used: u32 = 0;

    let reason = loop {
        if cycles >= limits.max_cycles {
            break StableReason::CycleCap;
        }
        if start.elapsed() >= limits.max_wall_clock {
            break StableReason::TimeCap;
        }

        scroll(renderer).await?;
        tokio::time::sleep(limits.cycle_pause).await;
        cycles += 1;

        let count = match observe(renderer, adapter).await? {
            Some((count, matched)) => {
                if matched.is_some() {
                    selector = matched;
                }
                count
            }
            None => previous.unwrap_or(0),
        };
        max_seen = max_seen.max(count);

        if previous == Some(count) {
            unchanged += 1;
        } else {
            unchanged = 0;
        }
        previous = Some(count);

        if let Ok(height) = renderer.current_height().await {
            debug!(
                "Cycle {}: {} units, height {}, unchanged {}/{}",
                cycles, count, height, unchanged, threshold
            );
        }

        if unchanged < threshold {
            continue;
        }

        if max_seen > 0 {
            break StableReason::Plateau;
        }

        // Nothing seen yet: give slow pages a few longer waits.
        let mut found = false;
        while grace_used < limits.zero_grace_checks {
            grace_used += 1;
            info!(
                "No comments yet, grace check {}/{}",
                grace_used, limits.zero_grace_checks
            );
            tokio::time::sleep(limits.grace_pause()).await;
            scroll(renderer).await?;
            if let Some((count, matched)) = observe(renderer, adapter).await? {
                if count > 0 {
                    max_seen = count;
                    previous = Some(count);
                    selector = matched;
                    unchanged = 0;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            break StableReason::ZeroFound;
        }
    };

    let final_count = previous.unwrap_or(0);
    let reason = if max_seen == 0 {
        StableReason::ZeroFound
    } else {
        reason
    };

    info!(
        "Page stable after {} cycles: {} units ({})",
        cycles,
        final_count,
        reason.as_str()
    );

    Ok(StableResult {
        final_count,
        reason,
        cycles,
        selector,
    })
}
