//! Progress events emitted by the harvest engine.
//!
//! Observers (the CLI progress bar, a dashboard) subscribe through an
//! `mpsc` channel. Events sent after the receiver is dropped are discarded.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestPhase {
    Starting,
    Navigating,
    Scrolling,
    Extracting,
    TargetCompleted,
    TargetSkipped,
    TargetFailed,
    Interrupted,
    Finished,
}

impl HarvestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Navigating => "navigating",
            Self::Scrolling => "scrolling",
            Self::Extracting => "extracting",
            Self::TargetCompleted => "completed",
            Self::TargetSkipped => "skipped",
            Self::TargetFailed => "failed",
            Self::Interrupted => "interrupted",
            Self::Finished => "finished",
        }
    }
}

/// One progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestEvent {
    pub phase: HarvestPhase,
    /// Overall run progress in `0.0..=1.0`.
    pub fraction: f64,
    pub message: String,
}

/// Sending half handed to the engine.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<HarvestEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<HarvestEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, phase: HarvestPhase, fraction: f64, message: impl Into<String>) {
        if let Some(ref tx) = self.tx {
            let _ = tx
                .send(HarvestEvent {
                    phase,
                    fraction: fraction.clamp(0.0, 1.0),
                    message: message.into(),
                })
                .await;
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::none()
    }
}
