//! Error taxonomy for the harvest library.
//!
//! Each layer has its own error type so that recovery is decided by type:
//! [`ExtractError`] stays inside the persister, [`TargetError`] stays inside
//! the engine's per-target step, and only [`HarvestError`] reaches callers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by a page renderer.
#[derive(Debug, Error)]
pub enum RendererError {
    /// The browser window or session is gone. Never recoverable within a run.
    #[error("Renderer session lost: {0}")]
    SessionLost(String),
    #[error("Navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },
    #[error("Script error: {0}")]
    Script(String),
    #[error("Failed to launch renderer: {0}")]
    Launch(String),
}

impl RendererError {
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::SessionLost(_))
    }
}

/// Failure of the stability detector. Only raised when the session is gone.
#[derive(Debug, Error)]
pub enum StabilityError {
    #[error("Renderer unavailable: {0}")]
    RendererUnavailable(#[source] RendererError),
}

/// Per-unit extraction failure. Logged and skipped, never escalated.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Invalid selector '{0}'")]
    Selector(String),
    #[error("Replies are not supported by the {0} adapter")]
    RepliesUnsupported(&'static str),
    #[error("{0}")]
    Malformed(String),
}

/// Bounded retry of a durable write gave up.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{what} failed after {attempts} attempts: {source}")]
    Exhausted {
        what: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("{what} failed: {source}")]
    Permanent {
        what: String,
        #[source]
        source: io::Error,
    },
}

impl RetryError {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Permanent { .. } => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Write(#[from] RetryError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Checkpoint regression: targetIndex {attempted} is behind saved {saved}")]
    Regression { saved: u64, attempted: u64 },
}

/// A per-target failure. The target is logged, marked exhausted and the run continues.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("Navigation failed: {0}")]
    Navigation(#[source] RendererError),
    #[error("Page error: {0}")]
    Page(#[source] RendererError),
    #[error("No comment container found (selectors: {selectors})")]
    NoContainer { selectors: String },
    #[error("No adapter registered for source '{0}'")]
    NoAdapter(&'static str),
}

#[derive(Debug, Error)]
pub enum TargetListError {
    #[error("Failed to read target list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Line {line}: cannot infer site for '{url}' (use --site)")]
    UnknownSource { line: usize, url: String },
}

impl TargetListError {
    /// The list file itself is missing or unreadable, as opposed to a bad line
    /// in a list that may belong to a campaign already under way.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::Read { .. })
    }
}

/// Run-terminating failures. Progress as last durably saved is preserved.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Renderer session lost: {0}")]
    SessionLost(#[source] RendererError),
    #[error("Checkpoint save failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Sink write failed: {0}")]
    Sink(#[source] RetryError),
}

impl From<StabilityError> for HarvestError {
    fn from(e: StabilityError) -> Self {
        match e {
            StabilityError::RendererUnavailable(inner) => HarvestError::SessionLost(inner),
        }
    }
}
