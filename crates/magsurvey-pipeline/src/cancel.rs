//! Cooperative cancellation shared between a caller and a running pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use magsurvey_grid::Budget;

use crate::error::PipelineError;
use crate::progress::Stage;

/// A cloneable cancellation flag.
///
/// Checked between stages and, through [`Budget`], inside grid loops. Setting
/// it is permanent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Return true once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Fail with [`PipelineError::Cancelled`] if cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] naming `stage`.
    pub fn check(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled { stage });
        }
        Ok(())
    }

    /// Build a grid [`Budget`] observing this token, expiring after `timeout`.
    #[must_use]
    pub fn budget(&self, timeout: Option<Duration>) -> Budget {
        let budget = Budget::unlimited().with_cancel_flag(Arc::clone(&self.0));
        match timeout {
            Some(timeout) => budget.with_timeout(timeout),
            None => budget,
        }
    }
}
