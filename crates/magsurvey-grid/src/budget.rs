//! Cooperative cancellation and deadlines for long-running grid work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::GridError;

/// A cancellation flag plus an optional deadline, polled inside grid loops.
///
/// The default budget never cancels and never expires.
#[derive(Debug, Clone, Default)]
pub struct Budget {
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl Budget {
    /// A budget with no cancellation flag and no deadline.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Observe `flag`; work stops once it is set.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Stop work at `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stop work `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Return the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Return true if the cancellation flag is set.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Check the budget.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GridError::Cancelled`] | The cancellation flag is set |
    /// | [`GridError::TimedOut`] | The deadline has passed |
    pub fn check(&self) -> Result<(), GridError> {
        if self.is_cancelled() {
            return Err(GridError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(GridError::TimedOut);
        }
        Ok(())
    }
}
