//! Extracted comment records and the rows they become.

use std::collections::BTreeMap;

use super::SourceKind;

/// Field map extracted from one comment unit by a site adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }

    /// Value of `name`, or an empty string when absent.
    pub fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Whether a row is a top-level comment or a reply to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Comment,
    Reply,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Reply => "reply",
        }
    }
}

/// A record ready to persist: numbered and tied to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    /// 1-based, strictly increasing and gap-free within a target.
    pub sequence_number: u64,
    /// Position on the page: `"3"` for the third unit, `"3.2"` for its second reply.
    pub ordinal: String,
    pub kind: RowKind,
    pub target_key: String,
    pub source: SourceKind,
    pub record: RawRecord,
}
