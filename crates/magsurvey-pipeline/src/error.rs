//! Error types for the pipeline driver.

use magsurvey_grid::GridError;
use magsurvey_io::{DatasetId, DatasetType, IoError};
use magsurvey_series::SeriesError;

use crate::progress::Stage;

/// Errors from driving the survey stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A time-series stage failed.
    #[error(transparent)]
    Series(#[from] SeriesError),

    /// Gridding or masking failed.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// Reading, writing or a dataset transition failed.
    #[error(transparent)]
    Io(#[from] IoError),

    /// Returned when a pipeline parameter is out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Returned when the cancel token was set before or during a stage.
    #[error("{stage} stage cancelled")]
    Cancelled {
        /// Stage that observed the cancellation.
        stage: Stage,
    },

    /// Returned when a stage ran past its timeout.
    #[error("{stage} stage exceeded its timeout")]
    TimedOut {
        /// Stage that timed out.
        stage: Stage,
    },

    /// Returned when a dataset id is not in the store.
    #[error("dataset {id} not found")]
    DatasetNotFound {
        /// The missing id.
        id: DatasetId,
    },

    /// Returned when a dataset has the wrong type for the role it was given.
    #[error("dataset {id} is {got}, expected {expected}")]
    WrongDatasetType {
        /// Offending dataset.
        id: DatasetId,
        /// Type the stage needs.
        expected: DatasetType,
        /// Type the dataset has.
        got: DatasetType,
    },

    /// Returned when gridding is requested on rows without projected coordinates.
    #[error("dataset {id} has no rows with easting and northing")]
    MissingCoordinates {
        /// Offending dataset.
        id: DatasetId,
    },

    /// Returned when a cached value cannot be encoded or decoded.
    #[error("cache entry {key}: {source}")]
    Cache {
        /// Cache key.
        key: String,
        /// Underlying bincode error.
        #[source]
        source: bincode::Error,
    },
}

impl PipelineError {
    /// Map a grid error raised inside `stage`, turning budget failures into
    /// their stage-level variants.
    pub(crate) fn from_grid(stage: Stage, err: GridError) -> Self {
        match err {
            GridError::Cancelled => Self::Cancelled { stage },
            GridError::TimedOut => Self::TimedOut { stage },
            other => Self::Grid(other),
        }
    }
}
