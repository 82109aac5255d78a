//! Append-only error log: one `timestamp - message` line per failure.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `error_log.txt` inside `state_dir`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("error_log.txt"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a line. Failures are reported through tracing only; the error
    /// log is diagnostic and never stops a harvest.
    pub fn record(&self, message: &str) {
        if let Err(e) = self.try_record(message) {
            warn!("Failed to write error log {}: {}", self.path.display(), e);
        }
    }

    fn try_record(&self, message: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "{} - {}", timestamp, message.replace('\n', " "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_timestamped_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::in_dir(&dir.path().join("logs"));

        log.record("unit 3 of 1295660 failed: Missing required field 'body'");
        log.record("second\nline");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - unit 3 of 1295660 failed: Missing required field 'body'"));
        assert_eq!(lines[0].find(" - "), Some(19));
        assert!(lines[1].ends_with(" - second line"));
    }
}
