//! comment-harvest: incremental, resumable harvesting of comments from
//! infinite-scroll review and video pages.
//!
//! A run walks an ordered list of targets. For each one the engine scrolls
//! until the comment count stops growing, extracts every unit through a
//! site adapter, and commits rows in batches, checkpointing after every
//! durable write so an interrupted run resumes exactly where it stopped.

pub mod adapters;
pub mod config;
pub mod error;
pub mod harvest;
pub mod models;
pub mod renderer;
pub mod retry;
pub mod sink;
pub mod targets;
