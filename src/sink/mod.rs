//! Durable output for harvested rows.
//!
//! A [`RowSink`] appends whole batches to a [`SinkDestination`]. Sinks do not
//! retry on their own; the persister wraps every write in the shared retry
//! policy so lock contention is handled in one place.

mod csv_file;
mod error_log;

pub use csv_file::CsvSink;
pub use error_log::ErrorLog;

use std::io;
use std::path::{Path, PathBuf};

use crate::models::{OutputRow, SourceKind};

/// Columns every output file starts with, before the adapter's own fields.
pub const FIXED_COLUMNS: &[&str] = &["sequence", "ordinal", "kind", "target", "source"];

const TITLE_MAX_CHARS: usize = 50;

/// Where one target's rows go, and which adapter fields become columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkDestination {
    pub path: PathBuf,
    pub fields: Vec<String>,
}

impl SinkDestination {
    pub fn new(path: impl Into<PathBuf>, fields: &[&str]) -> Self {
        Self {
            path: path.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Output file for a target: `<source>_<key>[_<title>]_comments.csv`.
    ///
    /// An existing file for the same source and key is reused, so a resumed
    /// target keeps appending to the file it started even if the page title
    /// changed in between.
    pub fn for_target(
        output_dir: &Path,
        source: SourceKind,
        target_key: &str,
        title: Option<&str>,
        fields: &[&str],
    ) -> Self {
        let prefix = format!("{}_{}", source.as_str(), sanitize_filename(target_key));
        if let Some(existing) = find_existing(output_dir, &prefix) {
            return Self::new(existing, fields);
        }

        let title = title.map(clean_title).filter(|t| !t.is_empty());
        let name = match title {
            Some(title) => format!("{}_{}_comments.csv", prefix, title),
            None => format!("{}_comments.csv", prefix),
        };
        Self::new(output_dir.join(name), fields)
    }

    /// Header row: fixed columns followed by the adapter fields.
    pub fn header(&self) -> Vec<String> {
        FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.fields.iter().cloned())
            .collect()
    }
}

fn find_existing(output_dir: &Path, prefix: &str) -> Option<PathBuf> {
    let exact = format!("{}_comments.csv", prefix);
    let titled = format!("{}_", prefix);
    let mut matches: Vec<PathBuf> = std::fs::read_dir(output_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|name| {
                    name == exact || (name.starts_with(&titled) && name.ends_with("_comments.csv"))
                })
                .unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Remove characters that are not allowed in file names.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitize a page title and cap it at 50 characters (`47 + "..."`).
pub fn clean_title(title: &str) -> String {
    let cleaned = sanitize_filename(title);
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() > TITLE_MAX_CHARS {
        let head: String = cleaned.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        cleaned
    }
}

/// Append-only destination for output rows.
pub trait RowSink: Send {
    /// Append `rows` to `dest`, writing the header first if the file is new.
    /// A failed call must leave no partial batch behind.
    fn write_rows(&mut self, dest: &SinkDestination, rows: &[OutputRow]) -> io::Result<()>;
}

impl<S: RowSink + ?Sized> RowSink for Box<S> {
    fn write_rows(&mut self, dest: &SinkDestination, rows: &[OutputRow]) -> io::Result<()> {
        (**self).write_rows(dest, rows)
    }
}

/// Collects rows in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<OutputRow>,
    pub writes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowSink for MemorySink {
    fn write_rows(&mut self, _dest: &SinkDestination, rows: &[OutputRow]) -> io::Result<()> {
        self.writes += 1;
        self.rows.extend_from_slice(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title_truncates() {
        assert_eq!(clean_title("Elden Ring: Nightreign?"), "Elden Ring Nightreign");
        let long = "字".repeat(60);
        let cleaned = clean_title(&long);
        assert_eq!(cleaned.chars().count(), 50);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn test_destination_name() {
        let dir = tempfile::tempdir().unwrap();
        let dest = SinkDestination::for_target(
            dir.path(),
            SourceKind::Steam,
            "1295660",
            Some("Civilization VII"),
            &["author", "body"],
        );
        assert_eq!(
            dest.path.file_name().unwrap().to_str().unwrap(),
            "steam_1295660_Civilization VII_comments.csv"
        );
        assert_eq!(
            dest.header(),
            vec!["sequence", "ordinal", "kind", "target", "source", "author", "body"]
        );

        let untitled = SinkDestination::for_target(dir.path(), SourceKind::Bili, "BV1", None, &[]);
        assert_eq!(
            untitled.path.file_name().unwrap().to_str().unwrap(),
            "bili_BV1_comments.csv"
        );
    }

    #[test]
    fn test_destination_reuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("taptap_168332_Old Title_comments.csv");
        std::fs::write(&existing, "sequence\n").unwrap();

        let dest = SinkDestination::for_target(
            dir.path(),
            SourceKind::TapTap,
            "168332",
            Some("New Title"),
            &["body"],
        );
        assert_eq!(dest.path, existing);

        // Different key must not match by prefix.
        let other = SinkDestination::for_target(dir.path(), SourceKind::TapTap, "16833", None, &[]);
        assert_ne!(other.path, existing);
    }
}
