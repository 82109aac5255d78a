//! Data models for comment harvesting.

mod progress;
mod record;
mod target;

pub use progress::{HarvestProgress, UnitCursor};
pub use record::{OutputRow, RawRecord, RowKind};
pub use target::{SourceKind, Target};
