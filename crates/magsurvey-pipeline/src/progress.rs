//! Fire-and-forget progress events.
//!
//! The pipeline never blocks on a slow consumer: events go through a bounded
//! channel with `try_send` and are dropped when the channel is full or the
//! receiver is gone.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use serde::{Deserialize, Serialize};

/// Pipeline stages, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading dataset tables.
    Load,
    /// Observatory alignment and diurnal correction.
    Diurnal,
    /// Residual extraction.
    Residuals,
    /// Gridding and masking.
    Interpolate,
    /// Writing tables and the raster.
    Export,
}

impl Stage {
    /// Return the lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Diurnal => "diurnal",
            Stage::Residuals => "residuals",
            Stage::Interpolate => "interpolate",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Stage that emitted the event.
    pub stage: Stage,
    /// Human-readable message.
    pub message: String,
}

/// Sends [`ProgressEvent`]s without ever blocking.
///
/// A disabled reporter discards everything.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<SyncSender<ProgressEvent>>,
    dropped: Arc<AtomicUsize>,
}

impl ProgressReporter {
    /// Report through `sender`.
    #[must_use]
    pub fn new(sender: SyncSender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
            dropped: Arc::default(),
        }
    }

    /// A reporter that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Create a reporter and the receiving end of a channel holding at most
    /// `capacity` undelivered events.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (Self::new(tx), rx)
    }

    /// Send an event. Returns true if it was queued.
    pub fn report(&self, stage: Stage, message: impl Into<String>) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        let event = ProgressEvent {
            stage,
            message: message.into(),
        };
        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Return the number of events dropped so far, across all clones.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}
