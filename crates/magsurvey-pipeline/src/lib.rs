//! Stage driver for magnetometer surveys.
//!
//! Runs diurnal correction, residual extraction, gridding and export over
//! datasets held in a [`DatasetStore`], with explicit [`PipelineParams`], an
//! injected [`ResultCache`], non-blocking progress events and cooperative
//! cancellation.

mod cache;
mod cancel;
mod error;
mod params;
mod pipeline;
mod progress;
mod store;

pub use cache::{InMemoryCache, NoCache, ResultCache, diurnal_key, grid_key, residuals_key};
pub use cancel::CancelToken;
pub use error::PipelineError;
pub use params::{MIN_GRID_SPACING, PipelineParams, ValueColumn};
pub use pipeline::{ExportedFiles, GridSummary, Pipeline, RunReport, StageResult};
pub use progress::{ProgressEvent, ProgressReporter, Stage};
pub use store::{DatasetStore, InMemoryDatasetStore};
