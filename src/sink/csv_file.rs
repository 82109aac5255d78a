//! CSV output files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};

use tracing::warn;

use super::{RowSink, SinkDestination};
use crate::models::OutputRow;

/// Appends rows to one CSV file per destination.
///
/// Each batch is serialised in memory and appended in one go. If the append
/// fails part way the file is cut back to its previous length, so the retry
/// (or a resumed run) appends onto a whole row.
#[derive(Debug, Default)]
pub struct CsvSink;

impl CsvSink {
    pub fn new() -> Self {
        Self
    }

    fn encode(dest: &SinkDestination, rows: &[OutputRow], with_header: bool) -> io::Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());

        if with_header {
            writer.write_record(dest.header())?;
        }

        for row in rows {
            let sequence = row.sequence_number.to_string();
            let mut record: Vec<&str> = vec![
                sequence.as_str(),
                row.ordinal.as_str(),
                row.kind.as_str(),
                row.target_key.as_str(),
                row.source.as_str(),
            ];
            record.extend(dest.fields.iter().map(|f| row.record.value(f)));
            writer.write_record(&record)?;
        }

        writer
            .into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

impl RowSink for CsvSink {
    fn write_rows(&mut self, dest: &SinkDestination, rows: &[OutputRow]) -> io::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        if let Some(parent) = dest.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&dest.path)?;
        let start_len = file.metadata()?.len();

        let bytes = Self::encode(dest, rows, start_len == 0)?;
        append_whole(&mut file, start_len, &bytes)
    }
}

/// Output that can be cut back to an earlier length.
trait Truncate {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append `bytes` completely or not at all.
///
/// The original write error is returned even when the rollback also fails.
fn append_whole<W: Write + Truncate>(out: &mut W, start_len: u64, bytes: &[u8]) -> io::Result<()> {
    let written = out.write_all(bytes).and_then(|_| out.flush());
    if let Err(e) = written {
        if let Err(rollback) = out.truncate_to(start_len) {
            warn!("Failed to roll back partial batch: {}", rollback);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawRecord, RowKind, SourceKind};

    fn row(seq: u64, body: &str) -> OutputRow {
        OutputRow {
            sequence_number: seq,
            ordinal: seq.to_string(),
            kind: RowKind::Comment,
            target_key: "BV1".to_string(),
            source: SourceKind::Bili,
            record: RawRecord::new().with("author", "某人").with("body", body),
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let dest = SinkDestination::new(dir.path().join("out/bili_BV1_comments.csv"), &["author", "body"]);
        let mut sink = CsvSink::new();

        sink.write_rows(&dest, &[row(1, "第一"), row(2, "has, comma")]).unwrap();
        sink.write_rows(&dest, &[row(3, "第三")]).unwrap();

        let content = std::fs::read_to_string(&dest.path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "sequence,ordinal,kind,target,source,author,body");
        assert_eq!(lines[1], "1,1,comment,BV1,bili,某人,第一");
        assert_eq!(lines[2], "2,2,comment,BV1,bili,某人,\"has, comma\"");
        assert_eq!(lines[3], "3,3,comment,BV1,bili,某人,第三");
    }

    /// Accepts `room` more bytes, then fails like a full disk.
    struct FullDisk {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "No space left on device"));
            }
            let n = buf.len().min(self.room).min(7);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for FullDisk {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_leaves_file_unchanged() {
        let dest = SinkDestination::new("bili_BV1_comments.csv", &["author", "body"]);
        let existing = CsvSink::encode(&dest, &[row(1, "第一")], true).unwrap();
        let batch = CsvSink::encode(&dest, &[row(2, "第二"), row(3, "第三")], false).unwrap();

        let mut out = FullDisk {
            data: existing.clone(),
            room: batch.len() - 5,
        };
        let err = append_whole(&mut out, existing.len() as u64, &batch).unwrap_err();
        assert!(err.to_string().contains("No space"));
        assert_eq!(out.data, existing);

        out.room = batch.len();
        append_whole(&mut out, existing.len() as u64, &batch).unwrap();
        let content = String::from_utf8(out.data).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "3,3,comment,BV1,bili,某人,第三");
    }

    #[test]
    fn test_empty_batch_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = SinkDestination::new(dir.path().join("empty.csv"), &["body"]);
        CsvSink::new().write_rows(&dest, &[]).unwrap();
        assert!(!dest.path.exists());
    }
}
