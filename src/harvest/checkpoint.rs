//! Durable, crash-safe harvesting progress.
//!
//! The checkpoint is a single JSON document replaced wholesale on every
//! save via a temp file in the same directory, so a reader sees either the
//! old snapshot or the new one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::CheckpointError;
use crate::models::HarvestProgress;
use crate::retry::{retry_io, RetryPolicy};

/// Owner of the on-disk progress record.
pub struct CheckpointStore {
    path: PathBuf,
    policy: RetryPolicy,
    last_saved: HarvestProgress,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            last_saved: HarvestProgress::default(),
        }
    }

    /// `<state_dir>/<run_key>.progress.json`
    pub fn for_run(state_dir: &Path, run_key: &str, policy: RetryPolicy) -> Self {
        Self::new(state_dir.join(format!("{}.progress.json", run_key)), policy)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Progress as of the most recent successful save or load.
    pub fn last_saved(&self) -> &HarvestProgress {
        &self.last_saved
    }

    /// Load saved progress. Missing or unreadable data yields the default.
    pub fn load(&mut self) -> HarvestProgress {
        let progress = read_progress(&self.path);
        self.last_saved = progress.clone();
        progress
    }

    /// Persist a full snapshot, retrying transient write failures.
    ///
    /// `target_index` may never go backwards between saves; only
    /// [`CheckpointStore::reset`] starts it over.
    pub async fn save(&mut self, progress: &HarvestProgress) -> Result<(), CheckpointError> {
        if progress.target_index < self.last_saved.target_index {
            return Err(CheckpointError::Regression {
                saved: self.last_saved.target_index,
                attempted: progress.target_index,
            });
        }

        self.write(progress).await?;
        self.last_saved = progress.clone();
        debug!(
            "Checkpoint saved: targetIndex={} unitCursor={} subUnitCursor={} key={}",
            progress.target_index,
            progress.unit_cursor,
            progress.sub_unit_cursor,
            progress.last_target_key
        );
        Ok(())
    }

    /// Write the zero-value default.
    pub async fn reset(&mut self) -> Result<(), CheckpointError> {
        let zero = HarvestProgress::default();
        self.write(&zero).await?;
        self.last_saved = zero;
        info!("Checkpoint reset: {}", self.path.display());
        Ok(())
    }

    async fn write(&self, progress: &HarvestProgress) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(progress)?;
        let path = self.path.clone();
        retry_io(&self.policy, "checkpoint save", || write_atomic(&path, &json)).await?;
        Ok(())
    }
}

/// Read a checkpoint file without touching any store state.
pub fn read_progress(path: &Path) -> HarvestProgress {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return HarvestProgress::default(),
        Err(e) => {
            warn!(
                "Cannot read checkpoint {}: {}; starting from scratch",
                path.display(),
                e
            );
            return HarvestProgress::default();
        }
    };

    let content = content.trim_start_matches('\u{feff}');
    if content.trim().is_empty() {
        return HarvestProgress::default();
    }

    match serde_json::from_str(content) {
        Ok(progress) => progress,
        Err(e) => {
            warn!(
                "Corrupt checkpoint {}: {}; starting from scratch",
                path.display(),
                e
            );
            HarvestProgress::default()
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store(dir: &Path) -> CheckpointStore {
        CheckpointStore::for_run(dir, "targets", RetryPolicy::new(3, Duration::from_millis(10)))
    }

    fn progress(target_index: u64, unit_cursor: u64, key: &str) -> HarvestProgress {
        HarvestProgress {
            target_index,
            unit_cursor,
            sub_unit_cursor: 0,
            sequence_cursor: unit_cursor,
            last_target_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        assert!(store.load().is_default());

        store.save(&progress(2, 30, "1295660")).await.unwrap();

        let mut reopened = CheckpointStore::for_run(dir.path(), "targets", RetryPolicy::default());
        assert_eq!(reopened.load(), progress(2, 30, "1295660"));
        assert!(dir.path().join("targets.progress.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        fs::write(store.path(), "{\"targetIndex\": 3, \"unitCur").unwrap();

        assert!(store.load().is_default());
    }

    #[tokio::test]
    async fn test_bom_prefixed_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        fs::write(
            store.path(),
            "\u{feff}{\"targetIndex\":1,\"unitCursor\":0,\"subUnitCursor\":0,\"lastTargetKey\":\"BV1\"}",
        )
        .unwrap();

        assert_eq!(store.load().target_index, 1);
    }

    #[tokio::test]
    async fn test_target_index_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());

        store.save(&progress(1, 0, "a")).await.unwrap();
        store.save(&progress(2, 10, "b")).await.unwrap();
        let err = store.save(&progress(1, 0, "a")).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Regression { saved: 2, attempted: 1 }));
        assert_eq!(read_progress(store.path()).target_index, 2);

        store.reset().await.unwrap();
        assert!(read_progress(store.path()).is_default());
        store.save(&progress(1, 0, "a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_unwritable_location_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the state directory should be.
        let blocker = dir.path().join("state");
        fs::write(&blocker, "").unwrap();

        let mut store = CheckpointStore::for_run(
            &blocker,
            "targets",
            RetryPolicy::new(2, Duration::from_millis(1)),
        );
        assert!(store.save(&progress(1, 0, "a")).await.is_err());
        assert!(store.last_saved().is_default());
    }
}
