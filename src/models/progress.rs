//! Durable harvesting progress.

use serde::{Deserialize, Serialize};

/// Process-wide harvesting progress, persisted after every unit of work.
///
/// The within-target cursors (`unit_cursor`, `sub_unit_cursor`,
/// `sequence_cursor`) only describe the target named by `last_target_key`.
/// Use [`HarvestProgress::cursor_for`] rather than reading them directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestProgress {
    /// Number of targets fully processed (completed, skipped or failed).
    #[serde(default)]
    pub target_index: u64,
    /// Comment units consumed within the current target.
    #[serde(default)]
    pub unit_cursor: u64,
    /// Items consumed within the current parent unit. Item 0 is the parent
    /// row itself, items 1.. are its replies.
    #[serde(default)]
    pub sub_unit_cursor: u64,
    /// Rows durably written for the current target.
    #[serde(default)]
    pub sequence_cursor: u64,
    /// Key of the target the cursors belong to.
    #[serde(default)]
    pub last_target_key: String,
}

/// Resume position inside a single target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitCursor {
    pub unit: u64,
    pub sub_unit: u64,
    /// Rows already written; the next row gets `sequence + 1`.
    pub sequence: u64,
}

impl UnitCursor {
    pub fn is_start(&self) -> bool {
        *self == Self::default()
    }
}

impl HarvestProgress {
    /// Cursor to resume `target_key` from. Zero unless the saved cursors
    /// belong to this very target.
    pub fn cursor_for(&self, target_key: &str) -> UnitCursor {
        if !target_key.is_empty() && self.last_target_key == target_key {
            UnitCursor {
                unit: self.unit_cursor,
                sub_unit: self.sub_unit_cursor,
                sequence: self.sequence_cursor,
            }
        } else {
            UnitCursor::default()
        }
    }

    /// Bind the within-target cursors to `target_key`.
    pub fn set_cursor(&mut self, target_key: &str, cursor: UnitCursor) {
        self.last_target_key = target_key.to_string();
        self.unit_cursor = cursor.unit;
        self.sub_unit_cursor = cursor.sub_unit;
        self.sequence_cursor = cursor.sequence;
    }

    /// Mark the current target as finished and move on to the next one.
    pub fn complete_target(&mut self, target_key: &str) {
        self.target_index += 1;
        self.set_cursor(target_key, UnitCursor::default());
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}
