//! Error types for alignment, diurnal correction and residual extraction.

use chrono::NaiveDateTime;

/// Errors from time-series processing stages.
#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    /// Returned when a stage receives fewer samples than it needs.
    #[error("{stage} needs at least {needed} samples, got {got}")]
    DataInsufficient {
        /// Stage that rejected the input.
        stage: &'static str,
        /// Minimum number of samples required.
        needed: usize,
        /// Number of samples provided.
        got: usize,
    },

    /// Returned when the survey and observatory time ranges do not overlap.
    #[error(
        "survey ({survey_start} to {survey_end}) and observatory \
         ({observatory_start} to {observatory_end}) time ranges do not overlap"
    )]
    AlignmentMismatch {
        /// Earliest survey timestamp.
        survey_start: NaiveDateTime,
        /// Latest survey timestamp.
        survey_end: NaiveDateTime,
        /// Earliest observatory timestamp.
        observatory_start: NaiveDateTime,
        /// Latest observatory timestamp.
        observatory_end: NaiveDateTime,
    },

    /// Returned when the survey sampling period is zero and the observatory
    /// would have to be resampled onto it.
    #[error("survey sampling period is zero; cannot resample observatory data onto it")]
    DegeneratePeriod,

    /// Returned when resampling would allocate more samples than allowed.
    #[error("resampling would produce {len} samples, limit is {max}")]
    ResampleTooLarge {
        /// Number of lattice points the resample would produce.
        len: u64,
        /// Configured upper bound.
        max: u64,
    },

    /// Returned when a smoothing window has zero width.
    #[error("smoothing window must be at least 1 sample, got {size}")]
    InvalidWindow {
        /// The rejected window size.
        size: usize,
    },

    /// Returned when a clip range is empty or not finite.
    #[error("invalid clip range: min {min} must be finite and below max {max}")]
    InvalidClipRange {
        /// Lower clip bound.
        min: f64,
        /// Upper clip bound.
        max: f64,
    },
}
