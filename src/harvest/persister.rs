//! Turns comment units into numbered rows and commits them in batches.
//!
//! Rows are buffered until `batch_size` are ready (or the units run out),
//! written to the sink, and only then is the checkpoint advanced past them.
//! A crash therefore loses at most the batch in flight and never lets the
//! checkpoint claim rows that were not written.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::checkpoint::CheckpointStore;
use super::events::{EventSink, HarvestPhase};
use crate::adapters::SiteAdapter;
use crate::error::HarvestError;
use crate::models::{HarvestProgress, OutputRow, RawRecord, RowKind, SourceKind, UnitCursor};
use crate::renderer::DomNode;
use crate::retry::{retry_io, RetryPolicy};
use crate::sink::{ErrorLog, RowSink, SinkDestination};

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Per-call tallies. Replies count as items alongside their parents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// A stop was requested and honoured after a flush.
    pub interrupted: bool,
}

/// Everything the persister needs for one target.
pub struct BatchPersister<'a> {
    pub adapter: &'a dyn SiteAdapter,
    pub sink: &'a mut dyn RowSink,
    pub destination: &'a SinkDestination,
    pub store: &'a mut CheckpointStore,
    pub error_log: &'a ErrorLog,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub target_key: &'a str,
    pub source: SourceKind,
    pub stop: &'a AtomicBool,
    pub events: &'a EventSink,
    /// Overall run fraction at the start of this target and the share it covers.
    pub fraction_span: (f64, f64),
}

impl<'a> BatchPersister<'a> {
    /// Process `units` starting at the cursor saved for this target.
    ///
    /// Extraction failures are logged and skipped. Sink and checkpoint
    /// failures that exhaust their retries are returned as fatal.
    pub async fn process_units(
        &mut self,
        units: &[DomNode],
        progress: &mut HarvestProgress,
    ) -> Result<ProcessResult, HarvestError> {
        let batch_size = self.batch_size.max(1);
        let start = progress.cursor_for(self.target_key);
        let total = units.len() as u64;

        let mut result = ProcessResult::default();
        let mut pending: Vec<OutputRow> = Vec::with_capacity(batch_size);
        let mut next_sequence = start.sequence + 1;
        let mut written = start.sequence;
        let mut last_cursor = start;

        if start.unit > 0 || start.sub_unit > 0 {
            info!(
                "Resuming {} at unit {} item {} (sequence {}, {} units on page)",
                self.target_key, start.unit, start.sub_unit, start.sequence, total
            );
        }

        for index in start.unit..total {
            let node = &units[index as usize];
            let ordinal = (index + 1).to_string();
            let first_item = if index == start.unit { start.sub_unit } else { 0 };

            let parent = if first_item == 0 {
                result.attempted += 1;
                match self.adapter.extract(node) {
                    Ok(record) => {
                        result.succeeded += 1;
                        pending.push(self.row(next_sequence, ordinal.clone(), RowKind::Comment, record.clone()));
                        next_sequence += 1;
                        Some(record)
                    }
                    Err(e) => {
                        result.failed += 1;
                        self.log_failure(&ordinal, &e.to_string());
                        None
                    }
                }
            } else {
                // Parent row was written before the interruption; extract it
                // again only for the reply context.
                match self.adapter.extract(node) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        debug!("Parent {} no longer extractable on resume: {}", ordinal, e);
                        None
                    }
                }
            };

            let replies = match (self.adapter.reply_selector(), parent.as_ref()) {
                (Some(selector), Some(_)) => match node.select_nodes(selector) {
                    Ok(replies) => replies,
                    Err(e) => {
                        self.log_failure(&ordinal, &format!("replies: {}", e));
                        Vec::new()
                    }
                },
                _ => Vec::new(),
            };
            let item_count = 1 + replies.len() as u64;

            // Item 0 is the parent row, so it is consumed once we get here.
            let mut item = first_item.max(1);
            if pending.len() >= batch_size {
                last_cursor = self.cursor_after(index, item, item_count, next_sequence);
                written = self.flush(&mut pending, last_cursor, progress, written, index, total).await?;
                if self.should_stop(last_cursor, total) {
                    result.interrupted = true;
                    return Ok(result);
                }
            }

            if let Some(ref parent) = parent {
                while item < item_count {
                    let reply_ordinal = format!("{}.{}", ordinal, item);
                    result.attempted += 1;
                    match self.adapter.extract_reply(parent, &replies[(item - 1) as usize]) {
                        Ok(record) => {
                            result.succeeded += 1;
                            pending.push(self.row(next_sequence, reply_ordinal, RowKind::Reply, record));
                            next_sequence += 1;
                        }
                        Err(e) => {
                            result.failed += 1;
                            self.log_failure(&reply_ordinal, &e.to_string());
                        }
                    }
                    item += 1;

                    if pending.len() >= batch_size {
                        last_cursor = self.cursor_after(index, item, item_count, next_sequence);
                        written = self.flush(&mut pending, last_cursor, progress, written, index, total).await?;
                        if self.should_stop(last_cursor, total) {
                            result.interrupted = true;
                            return Ok(result);
                        }
                    }
                }
            }
        }

        if !pending.is_empty() {
            last_cursor = UnitCursor {
                unit: total,
                sub_unit: 0,
                sequence: next_sequence - 1,
            };
            self.flush(&mut pending, last_cursor, progress, written, total, total).await?;
        }

        debug!(
            "Processed {}: attempted {}, succeeded {}, failed {}, cursor {:?}",
            self.target_key, result.attempted, result.succeeded, result.failed, last_cursor
        );
        Ok(result)
    }

    fn row(&self, sequence: u64, ordinal: String, kind: RowKind, record: RawRecord) -> OutputRow {
        OutputRow {
            sequence_number: sequence,
            ordinal,
            kind,
            target_key: self.target_key.to_string(),
            source: self.source,
            record,
        }
    }

    /// Resume position after `item` items of unit `index` have been consumed.
    fn cursor_after(&self, index: u64, item: u64, item_count: u64, next_sequence: u64) -> UnitCursor {
        if item >= item_count {
            UnitCursor {
                unit: index + 1,
                sub_unit: 0,
                sequence: next_sequence - 1,
            }
        } else {
            UnitCursor {
                unit: index,
                sub_unit: item,
                sequence: next_sequence - 1,
            }
        }
    }

    /// Write the pending batch, then checkpoint past it.
    async fn flush(
        &mut self,
        pending: &mut Vec<OutputRow>,
        cursor: UnitCursor,
        progress: &mut HarvestProgress,
        written: u64,
        index: u64,
        total: u64,
    ) -> Result<u64, HarvestError> {
        let sink = &mut *self.sink;
        let destination = self.destination;
        let rows: &[OutputRow] = pending.as_slice();
        retry_io(&self.retry, "sink write", || sink.write_rows(destination, rows))
            .await
            .map_err(HarvestError::Sink)?;

        let count = pending.len() as u64;
        pending.clear();

        progress.set_cursor(self.target_key, cursor);
        self.store.save(progress).await?;

        info!(
            "Saved {} rows for {} (rows {}..={}, next unit {})",
            count,
            self.target_key,
            written + 1,
            cursor.sequence,
            cursor.unit
        );

        let (base, span) = self.fraction_span;
        let within = if total == 0 { 1.0 } else { index as f64 / total as f64 };
        self.events
            .emit(
                HarvestPhase::Extracting,
                base + span * within,
                format!("{}: {} rows saved", self.target_key, cursor.sequence),
            )
            .await;

        Ok(cursor.sequence)
    }

    fn log_failure(&self, ordinal: &str, message: &str) {
        warn!("Unit {} of {} failed: {}", ordinal, self.target_key, message);
        self.error_log.record(&format!(
            "{} target {}: unit {} extraction failed: {}",
            self.source, self.target_key, ordinal, message
        ));
    }

    /// A stop only interrupts a target with units left; a fully written
    /// target is finished and the engine stops at the next boundary.
    fn should_stop(&self, cursor: UnitCursor, total: u64) -> bool {
        cursor.unit < total && self.stop.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::sink::MemorySink;

    /// Extracts `<div class="unit" data-n="N">`; units listed in `fail` raise.
    struct NumberedAdapter {
        fail: HashSet<String>,
        replies: bool,
    }

    impl NumberedAdapter {
        fn new(fail: &[&str]) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                replies: false,
            }
        }
    }

    impl SiteAdapter for NumberedAdapter {
        fn kind(&self) -> SourceKind {
            SourceKind::Bili
        }
        fn unit_selectors(&self) -> &[&str] {
            &[".unit"]
        }
        fn reply_selector(&self) -> Option<&str> {
            self.replies.then_some(".reply")
        }
        fn fields(&self) -> &[&str] {
            &["n"]
        }
        fn normalize_url(&self, raw: &str) -> String {
            raw.to_string()
        }
        fn target_key(&self, url: &str) -> String {
            url.to_string()
        }
        fn extract(&self, node: &DomNode) -> Result<RawRecord, ExtractError> {
            let n = node.select_attr(".unit", "data-n")?.unwrap_or_default();
            if self.fail.contains(&n) {
                return Err(ExtractError::Malformed(format!("unit {} is broken", n)));
            }
            Ok(RawRecord::new().with("n", n))
        }
        fn extract_reply(&self, parent: &RawRecord, node: &DomNode) -> Result<RawRecord, ExtractError> {
            let n = node.select_attr(".reply", "data-n")?.unwrap_or_default();
            if self.fail.contains(&n) {
                return Err(ExtractError::Malformed(format!("reply {} is broken", n)));
            }
            Ok(RawRecord::new().with("n", n).with("parent", parent.value("n")))
        }
    }

    fn units(count: usize) -> Vec<DomNode> {
        (0..count)
            .map(|i| DomNode::new(format!(r#"<div class="unit" data-n="{}">c{}</div>"#, i, i)))
            .collect()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: CheckpointStore,
        error_log: ErrorLog,
        destination: SinkDestination,
        stop: AtomicBool,
        events: EventSink,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = CheckpointStore::for_run(dir.path(), "run", RetryPolicy::default());
            let error_log = ErrorLog::in_dir(dir.path());
            let destination = SinkDestination::new(dir.path().join("out.csv"), &["n"]);
            Self {
                _dir: dir,
                store,
                error_log,
                destination,
                stop: AtomicBool::new(false),
                events: EventSink::none(),
            }
        }

        fn persister<'a>(
            &'a mut self,
            adapter: &'a dyn SiteAdapter,
            sink: &'a mut dyn RowSink,
            batch_size: usize,
        ) -> BatchPersister<'a> {
            BatchPersister {
                adapter,
                sink,
                destination: &self.destination,
                store: &mut self.store,
                error_log: &self.error_log,
                retry: RetryPolicy::default(),
                batch_size,
                target_key: "T1",
                source: SourceKind::Bili,
                stop: &self.stop,
                events: &self.events,
                fraction_span: (0.0, 1.0),
            }
        }
    }

    /// Fails every write with a transient lock error.
    struct LockedSink {
        attempts: Arc<AtomicUsize>,
    }

    impl RowSink for LockedSink {
        fn write_rows(&mut self, _dest: &SinkDestination, _rows: &[OutputRow]) -> io::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked by another process"))
        }
    }

    fn sequences(sink: &MemorySink) -> Vec<u64> {
        sink.rows.iter().map(|r| r.sequence_number).collect()
    }

    #[tokio::test]
    async fn test_failed_units_are_isolated() {
        let mut fixture = Fixture::new();
        let adapter = NumberedAdapter::new(&["3", "7"]);
        let mut sink = MemorySink::new();
        let mut progress = HarvestProgress::default();

        let result = fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&units(10), &mut progress)
            .await
            .unwrap();

        assert_eq!(result.attempted, 10);
        assert_eq!(result.succeeded, 8);
        assert_eq!(result.failed, 2);
        assert_eq!(sequences(&sink), (1..=8).collect::<Vec<_>>());
        let ordinals: Vec<&str> = sink.rows.iter().map(|r| r.ordinal.as_str()).collect();
        assert_eq!(ordinals, vec!["1", "2", "3", "5", "6", "7", "9", "10"]);
        assert_eq!(progress.unit_cursor, 10);
        assert_eq!(progress.sequence_cursor, 8);

        let log = std::fs::read_to_string(fixture.error_log.path()).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("unit 4 extraction failed: unit 3 is broken"));
    }

    #[tokio::test]
    async fn test_batches_advance_checkpoint_after_each_flush() {
        let mut fixture = Fixture::new();
        let adapter = NumberedAdapter::new(&[]);
        let mut sink = MemorySink::new();
        let mut progress = HarvestProgress::default();

        fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&units(23), &mut progress)
            .await
            .unwrap();

        assert_eq!(sink.writes, 3);
        assert_eq!(sequences(&sink), (1..=23).collect::<Vec<_>>());
        let saved = fixture.store.last_saved();
        assert_eq!(saved.unit_cursor, 23);
        assert_eq!(saved.sequence_cursor, 23);
        assert_eq!(saved.last_target_key, "T1");
    }

    #[tokio::test]
    async fn test_resume_continues_sequence() {
        let mut fixture = Fixture::new();
        let adapter = NumberedAdapter::new(&[]);
        let mut sink = MemorySink::new();
        let mut progress = HarvestProgress {
            target_index: 0,
            unit_cursor: 20,
            sub_unit_cursor: 0,
            sequence_cursor: 20,
            last_target_key: "T1".to_string(),
        };

        let result = fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&units(23), &mut progress)
            .await
            .unwrap();

        assert_eq!(result.attempted, 3);
        assert_eq!(sequences(&sink), vec![21, 22, 23]);
        assert_eq!(sink.rows[0].ordinal, "21");
    }

    #[tokio::test]
    async fn test_cursor_for_other_target_is_ignored() {
        let mut fixture = Fixture::new();
        let adapter = NumberedAdapter::new(&[]);
        let mut sink = MemorySink::new();
        let mut progress = HarvestProgress {
            target_index: 0,
            unit_cursor: 20,
            sub_unit_cursor: 0,
            sequence_cursor: 20,
            last_target_key: "OTHER".to_string(),
        };

        fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&units(5), &mut progress)
            .await
            .unwrap();

        assert_eq!(sequences(&sink), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_stop_is_honoured_after_a_flush() {
        let mut fixture = Fixture::new();
        fixture.stop.store(true, Ordering::SeqCst);
        let adapter = NumberedAdapter::new(&[]);
        let mut sink = MemorySink::new();
        let mut progress = HarvestProgress::default();

        let result = fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&units(25), &mut progress)
            .await
            .unwrap();

        assert!(result.interrupted);
        assert_eq!(sink.rows.len(), 10);
        assert_eq!(fixture.store.last_saved().unit_cursor, 10);
    }

    #[tokio::test]
    async fn test_stop_after_last_flush_completes_target() {
        let mut fixture = Fixture::new();
        fixture.stop.store(true, Ordering::SeqCst);
        let adapter = NumberedAdapter::new(&[]);
        let mut sink = MemorySink::new();
        let mut progress = HarvestProgress::default();

        let result = fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&units(10), &mut progress)
            .await
            .unwrap();

        // The only flush consumes the last unit, so the target is done.
        assert!(!result.interrupted);
        assert_eq!(sink.rows.len(), 10);
        assert_eq!(fixture.store.last_saved().unit_cursor, 10);
    }

    #[tokio::test]
    async fn test_stop_during_final_partial_batch_completes_target() {
        let mut fixture = Fixture::new();
        fixture.stop.store(true, Ordering::SeqCst);
        let adapter = NumberedAdapter::new(&[]);
        let mut sink = MemorySink::new();
        let mut progress = HarvestProgress::default();

        let result = fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&units(7), &mut progress)
            .await
            .unwrap();

        assert!(!result.interrupted);
        assert_eq!(sequences(&sink), (1..=7).collect::<Vec<_>>());
        assert_eq!(fixture.store.last_saved().unit_cursor, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_sink_retries_then_fails() {
        let mut fixture = Fixture::new();
        let adapter = NumberedAdapter::new(&[]);
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut sink = LockedSink {
            attempts: attempts.clone(),
        };
        let mut progress = HarvestProgress::default();
        let start = tokio::time::Instant::now();

        let err = fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&units(12), &mut progress)
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Sink(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 50);
        assert_eq!(start.elapsed(), Duration::from_secs(490));
        assert!(fixture.store.last_saved().is_default());
    }

    #[tokio::test]
    async fn test_replies_follow_their_parent() {
        let mut fixture = Fixture::new();
        let mut adapter = NumberedAdapter::new(&["1"]);
        adapter.replies = true;
        let nodes = vec![
            DomNode::new(
                r#"<div class="unit" data-n="0"><i class="reply" data-n="0a"></i><i class="reply" data-n="0b"></i></div>"#,
            ),
            DomNode::new(r#"<div class="unit" data-n="1"><i class="reply" data-n="1a"></i></div>"#),
            DomNode::new(r#"<div class="unit" data-n="2"></div>"#),
        ];
        let mut sink = MemorySink::new();
        let mut progress = HarvestProgress::default();

        let result = fixture
            .persister(&adapter, &mut sink, 10)
            .process_units(&nodes, &mut progress)
            .await
            .unwrap();

        let ordinals: Vec<&str> = sink.rows.iter().map(|r| r.ordinal.as_str()).collect();
        assert_eq!(ordinals, vec!["1", "1.1", "1.2", "3"]);
        assert_eq!(sink.rows[1].kind, RowKind::Reply);
        assert_eq!(sink.rows[2].record.value("parent"), "0");
        // Unit "1" failed, so its reply was never attempted.
        assert_eq!(result.attempted, 5);
        assert_eq!(result.failed, 1);
    }

    #[tokio::test]
    async fn test_resume_inside_reply_list() {
        let mut fixture = Fixture::new();
        let mut adapter = NumberedAdapter::new(&[]);
        adapter.replies = true;
        let nodes = vec![DomNode::new(
            r#"<div class="unit" data-n="0"><i class="reply" data-n="a"></i><i class="reply" data-n="b"></i><i class="reply" data-n="c"></i></div>"#,
        )];
        let mut sink = MemorySink::new();
        // Parent row and first reply were written earlier.
        let mut progress = HarvestProgress {
            target_index: 0,
            unit_cursor: 0,
            sub_unit_cursor: 2,
            sequence_cursor: 2,
            last_target_key: "T1".to_string(),
        };

        fixture
            .persister(&adapter, &mut sink, 2)
            .process_units(&nodes, &mut progress)
            .await
            .unwrap();

        let ordinals: Vec<&str> = sink.rows.iter().map(|r| r.ordinal.as_str()).collect();
        assert_eq!(ordinals, vec!["1.2", "1.3"]);
        assert_eq!(sequences(&sink), vec![3, 4]);
        assert_eq!(sink.rows[0].record.value("parent"), "0");
        assert_eq!(progress.unit_cursor, 1);
        assert_eq!(progress.sub_unit_cursor, 0);
    }
}
