//! Harvest engine: drives every target through navigate → stabilise →
//! extract → persist, with two-tier resumability.
//!
//! `targetIndex` skips targets finished in an earlier run; the unit cursor
//! resumes inside the one target that was interrupted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use super::checkpoint::CheckpointStore;
use super::events::{EventSink, HarvestPhase};
use super::persister::{BatchPersister, ProcessResult, DEFAULT_BATCH_SIZE};
use super::stability::{await_stable, StableReason, StabilityLimits};
use crate::adapters::{AdapterSet, SiteAdapter};
use crate::error::{HarvestError, RendererError, TargetError};
use crate::models::{HarvestProgress, Target};
use crate::renderer::{DomNode, PageRenderer};
use crate::retry::RetryPolicy;
use crate::sink::{ErrorLog, RowSink, SinkDestination};

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub batch_size: usize,
    pub limits: StabilityLimits,
    pub retry: RetryPolicy,
    pub output_dir: PathBuf,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            limits: StabilityLimits::default(),
            retry: RetryPolicy::default(),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Counts for a finished or interrupted run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Targets skipped because an earlier run finished them.
    pub already_done: usize,
    pub completed: usize,
    /// Targets with no comments at all.
    pub empty: usize,
    pub failed: usize,
    pub rows_written: usize,
    pub units_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every target processed; the checkpoint has been reset.
    Done(RunSummary),
    /// A stop was requested; the checkpoint holds the resume point.
    Interrupted(RunSummary),
}

enum TargetOutcome {
    Completed { key: String, result: ProcessResult },
    ZeroFound { key: String },
}

enum TargetFailure {
    /// Logged, the target is marked exhausted and the run continues.
    Target { key: String, error: TargetError },
    Fatal(HarvestError),
}

impl From<HarvestError> for TargetFailure {
    fn from(e: HarvestError) -> Self {
        TargetFailure::Fatal(e)
    }
}

/// Split a renderer error into fatal (session lost) or per-target.
fn classify(
    key: &str,
    err: RendererError,
    wrap: fn(RendererError) -> TargetError,
) -> TargetFailure {
    if err.is_session_lost() {
        TargetFailure::Fatal(HarvestError::SessionLost(err))
    } else {
        TargetFailure::Target {
            key: key.to_string(),
            error: wrap(err),
        }
    }
}

pub struct HarvestEngine<R, S> {
    renderer: R,
    sink: S,
    store: CheckpointStore,
    error_log: ErrorLog,
    adapters: AdapterSet,
    settings: HarvestSettings,
    events: EventSink,
    stop: Arc<AtomicBool>,
}

impl<R, S> HarvestEngine<R, S>
where
    R: PageRenderer,
    S: RowSink,
{
    pub fn new(
        renderer: R,
        sink: S,
        store: CheckpointStore,
        error_log: ErrorLog,
        adapters: AdapterSet,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            renderer,
            sink,
            store,
            error_log,
            adapters,
            settings,
            events: EventSink::none(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Share a stop flag. Setting it stops the run at the next target or
    /// batch boundary.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// Give back the renderer and sink, e.g. to close the browser.
    pub fn into_parts(self) -> (R, S, CheckpointStore) {
        (self.renderer, self.sink, self.store)
    }

    /// Harvest `targets` in order, resuming from the saved checkpoint.
    pub async fn run(&mut self, targets: &[Target]) -> Result<RunOutcome, HarvestError> {
        let mut progress = self.store.load();
        let total = targets.len();
        let mut summary = RunSummary::default();

        let skip = usize::try_from(progress.target_index).unwrap_or(usize::MAX);
        if skip > total {
            warn!(
                "Checkpoint targetIndex {} is beyond the {} targets in the list; treating the run as done",
                progress.target_index, total
            );
        }
        summary.already_done = skip.min(total);

        if skip > 0 && skip <= total {
            info!("Skipping {} targets completed in an earlier run", skip);
        }
        self.events
            .emit(
                HarvestPhase::Starting,
                fraction(summary.already_done, total),
                format!("{} targets, {} already done", total, summary.already_done),
            )
            .await;

        for (index, target) in targets.iter().enumerate().skip(summary.already_done) {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stop requested; halting before target {}", index + 1);
                self.events
                    .emit(HarvestPhase::Interrupted, fraction(index, total), "Interrupted")
                    .await;
                return Ok(RunOutcome::Interrupted(summary));
            }

            info!("Target {}/{}: {}", index + 1, total, target.url);

            let outcome = self.harvest_target(index, total, target, &mut progress).await;
            let key = match outcome {
                Ok(TargetOutcome::Completed { key, result }) => {
                    summary.rows_written += result.succeeded;
                    summary.units_failed += result.failed;
                    if result.interrupted {
                        self.events
                            .emit(HarvestPhase::Interrupted, fraction(index, total), "Interrupted")
                            .await;
                        return Ok(RunOutcome::Interrupted(summary));
                    }
                    summary.completed += 1;
                    self.events
                        .emit(
                            HarvestPhase::TargetCompleted,
                            fraction(index + 1, total),
                            format!("{}: {} rows", key, result.succeeded),
                        )
                        .await;
                    key
                }
                Ok(TargetOutcome::ZeroFound { key }) => {
                    summary.empty += 1;
                    warn!("No comments found on {}; skipping", target.url);
                    self.error_log.record(&format!(
                        "Target {} ({} {}) skipped: no comments found at {}",
                        index + 1,
                        target.source,
                        key,
                        target.url
                    ));
                    self.events
                        .emit(
                            HarvestPhase::TargetSkipped,
                            fraction(index + 1, total),
                            format!("{}: no comments", key),
                        )
                        .await;
                    key
                }
                Err(TargetFailure::Target { key, error }) => {
                    summary.failed += 1;
                    warn!("Target {} failed: {}", target.url, error);
                    self.error_log.record(&format!(
                        "Target {} ({} {}) failed at {}: {}",
                        index + 1,
                        target.source,
                        key,
                        target.url,
                        error
                    ));
                    self.events
                        .emit(
                            HarvestPhase::TargetFailed,
                            fraction(index + 1, total),
                            format!("{}: {}", key, error),
                        )
                        .await;
                    key
                }
                Err(TargetFailure::Fatal(e)) => {
                    self.record_fatal(index, target, &e);
                    return Err(e);
                }
            };

            progress.complete_target(&key);
            if let Err(e) = self.store.save(&progress).await {
                let e = HarvestError::from(e);
                self.record_fatal(index, target, &e);
                return Err(e);
            }
        }

        if let Err(e) = self.store.reset().await {
            let e = HarvestError::from(e);
            error!("Failed to reset checkpoint after finishing: {}", e);
            self.error_log
                .record(&format!("Fatal: checkpoint reset after run failed: {}", e));
            return Err(e);
        }

        info!(
            "Run complete: {} completed, {} empty, {} failed, {} rows",
            summary.completed, summary.empty, summary.failed, summary.rows_written
        );
        self.events
            .emit(
                HarvestPhase::Finished,
                1.0,
                format!("{} rows written", summary.rows_written),
            )
            .await;
        Ok(RunOutcome::Done(summary))
    }

    async fn harvest_target(
        &mut self,
        index: usize,
        total: usize,
        target: &Target,
        progress: &mut HarvestProgress,
    ) -> Result<TargetOutcome, TargetFailure> {
        let adapter = match self.adapters.get(target.source) {
            Some(adapter) => adapter,
            None => {
                return Err(TargetFailure::Target {
                    key: target.url.clone(),
                    error: TargetError::NoAdapter(target.source.as_str()),
                })
            }
        };

        let url = adapter.normalize_url(&target.url);
        let key = adapter.target_key(&url);
        let cursor = progress.cursor_for(&key);

        self.events
            .emit(
                HarvestPhase::Navigating,
                fraction(index, total),
                format!("{} {}", target.source, key),
            )
            .await;

        self.renderer
            .navigate(&url)
            .await
            .map_err(|e| classify(&key, e, TargetError::Navigation))?;

        self.prepare_page(adapter.as_ref()).await?;

        self.events
            .emit(
                HarvestPhase::Scrolling,
                fraction(index, total),
                format!("{}: loading comments", key),
            )
            .await;

        let stable = await_stable(&mut self.renderer, adapter.as_ref(), &self.settings.limits)
            .await
            .map_err(|e| TargetFailure::Fatal(e.into()))?;

        if stable.reason == StableReason::ZeroFound {
            return Ok(TargetOutcome::ZeroFound { key });
        }

        let units = self
            .collect_units(adapter.as_ref(), stable.selector.as_deref())
            .await
            .map_err(|e| classify(&key, e, TargetError::Page))?;
        if units.is_empty() {
            return Err(TargetFailure::Target {
                key,
                error: TargetError::NoContainer {
                    selectors: adapter.unit_selectors().join(", "),
                },
            });
        }

        let unit_count = units.len() as u64;
        if cursor.unit > unit_count {
            warn!(
                "Saved cursor {} for {} is beyond the {} units now on the page; completing without new rows",
                cursor.unit, key, unit_count
            );
            self.error_log.record(&format!(
                "Target {} ({} {}): resume cursor {} beyond {} units on page, no new rows",
                index + 1,
                target.source,
                key,
                cursor.unit,
                unit_count
            ));
            return Ok(TargetOutcome::Completed {
                key,
                result: ProcessResult::default(),
            });
        }

        let title = match self.renderer.title().await {
            Ok(title) => title.map(|t| adapter.clean_title(&t)),
            Err(e) if e.is_session_lost() => {
                return Err(TargetFailure::Fatal(HarvestError::SessionLost(e)))
            }
            Err(e) => {
                warn!("Could not read page title: {}", e);
                None
            }
        };

        let destination = SinkDestination::for_target(
            &self.settings.output_dir,
            target.source,
            &key,
            title.as_deref(),
            adapter.fields(),
        );

        info!(
            "Extracting {} units from {} into {} ({})",
            unit_count,
            key,
            destination.path.display(),
            stable.reason.as_str()
        );
        self.events
            .emit(
                HarvestPhase::Extracting,
                fraction(index, total),
                format!("{}: {} units", key, unit_count),
            )
            .await;

        let share = if total == 0 { 0.0 } else { 1.0 / total as f64 };
        let mut persister = BatchPersister {
            adapter: adapter.as_ref(),
            sink: &mut self.sink,
            destination: &destination,
            store: &mut self.store,
            error_log: &self.error_log,
            retry: self.settings.retry,
            batch_size: self.settings.batch_size,
            target_key: &key,
            source: target.source,
            stop: self.stop.as_ref(),
            events: &self.events,
            fraction_span: (fraction(index, total), share),
        };
        let result = persister.process_units(&units, progress).await?;

        info!(
            "Target {} done: attempted {}, succeeded {}, failed {}",
            key, result.attempted, result.succeeded, result.failed
        );

        Ok(TargetOutcome::Completed { key, result })
    }

    /// Run the adapter's setup script and bring the comment list into view.
    async fn prepare_page(&mut self, adapter: &dyn SiteAdapter) -> Result<(), TargetFailure> {
        if let Some(script) = adapter.prepare_script() {
            if let Err(e) = self.renderer.execute(script).await {
                if e.is_session_lost() {
                    return Err(TargetFailure::Fatal(HarvestError::SessionLost(e)));
                }
                warn!("Page preparation script failed: {}", e);
            }
        }

        for selector in adapter.container_selectors() {
            match self.renderer.scroll_into_view(selector).await {
                Ok(true) => break,
                Ok(false) => continue,
                Err(e) if e.is_session_lost() => {
                    return Err(TargetFailure::Fatal(HarvestError::SessionLost(e)))
                }
                Err(e) => warn!("Could not scroll {} into view: {}", selector, e),
            }
        }
        Ok(())
    }

    /// Snapshot the comment units, preferring the selector stability settled on.
    async fn collect_units(
        &mut self,
        adapter: &dyn SiteAdapter,
        preferred: Option<&str>,
    ) -> Result<Vec<DomNode>, RendererError> {
        if let Some(selector) = preferred {
            let units = self.renderer.query(selector).await?;
            if !units.is_empty() {
                return Ok(units);
            }
        }
        for selector in adapter.unit_selectors() {
            let units = self.renderer.query(selector).await?;
            if !units.is_empty() {
                return Ok(units);
            }
        }
        Ok(Vec::new())
    }

    fn record_fatal(&self, index: usize, target: &Target, err: &HarvestError) {
        let saved = self.store.last_saved();
        error!("Fatal error on target {} ({}): {}", index + 1, target.url, err);
        self.error_log.record(&format!(
            "Fatal on target {} ({}): {}; checkpoint targetIndex={} unitCursor={} subUnitCursor={} sequenceCursor={} lastTargetKey={}",
            index + 1,
            target.url,
            err,
            saved.target_index,
            saved.unit_cursor,
            saved.sub_unit_cursor,
            saved.sequence_cursor,
            saved.last_target_key
        ));
    }
}

fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}
