//! Incremental harvesting: stability detection, batched persistence,
//! checkpointing and the per-target engine that ties them together.

pub mod checkpoint;
pub mod engine;
pub mod events;
pub mod persister;
pub mod stability;

pub use checkpoint::{read_progress, CheckpointStore};
pub use engine::{HarvestEngine, HarvestSettings, RunOutcome, RunSummary};
pub use events::{EventSink, HarvestEvent, HarvestPhase};
pub use persister::{BatchPersister, ProcessResult, DEFAULT_BATCH_SIZE};
pub use stability::{await_stable, count_units, StabilityLimits, StableReason, StableResult};
