//! Error types for gridding, interpolation and masking.

/// Errors from grid construction, interpolation and masking.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Returned when a stage receives fewer points than it needs.
    #[error("{stage} needs at least {needed} points, got {got}")]
    DataInsufficient {
        /// Stage that rejected the input.
        stage: &'static str,
        /// Minimum number of points required.
        needed: usize,
        /// Number of points provided.
        got: usize,
    },

    /// Returned when the interpolant cannot be fitted to the points.
    #[error("interpolation fit failed: {reason}")]
    InterpolationFit {
        /// Why the fit failed.
        reason: String,
    },

    /// Returned when a grid would exceed the configured cell limit.
    #[error("grid of {width}x{height} cells exceeds the limit of {max_cells}")]
    GridTooLarge {
        /// Number of columns requested.
        width: u64,
        /// Number of rows requested.
        height: u64,
        /// Configured upper bound on `width * height`.
        max_cells: u64,
    },

    /// Returned when a grid spacing is not a positive finite number.
    #[error("grid spacing must be positive and finite, got {spacing}")]
    InvalidSpacing {
        /// The rejected spacing.
        spacing: f64,
    },

    /// Returned when a masking distance is not a positive finite number.
    #[error("mask distance must be positive and finite, got {distance}")]
    InvalidDistance {
        /// The rejected distance.
        distance: f64,
    },

    /// Returned when region bounds are not finite or are inverted.
    #[error("invalid region: west {west}, east {east}, south {south}, north {north}")]
    InvalidRegion {
        /// Western bound.
        west: f64,
        /// Eastern bound.
        east: f64,
        /// Southern bound.
        south: f64,
        /// Northern bound.
        north: f64,
    },

    /// Returned when a value buffer does not match the grid dimensions.
    #[error("expected {expected} grid values, got {got}")]
    ShapeMismatch {
        /// `width * height`.
        expected: usize,
        /// Length of the buffer provided.
        got: usize,
    },

    /// Returned when an input point has a non-finite coordinate or value.
    #[error("point {index} has a non-finite coordinate or value")]
    NonFinitePoint {
        /// Position of the offending point in the input.
        index: usize,
    },

    /// Returned when the work was cancelled through its budget.
    #[error("operation cancelled")]
    Cancelled,

    /// Returned when the budget deadline passed.
    #[error("operation exceeded its deadline")]
    TimedOut,

    /// Returned when the masking worker pool cannot be created.
    #[error("failed to build worker pool: {source}")]
    WorkerPool {
        /// Underlying rayon error.
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}
