//! Time-series processing for magnetometer surveys.
//!
//! Pure computation library with zero I/O. Aligns observatory (base station)
//! readings onto a survey's timestamps, applies diurnal correction, and
//! extracts residual anomalies by removing a smoothed ambient trend.

mod align;
mod diurnal;
mod error;
mod fill;
mod period;
mod record;
mod residual;
mod window;

pub use align::{
    AlignConfig, AlignedObservatory, DEFAULT_MAX_RESAMPLE_LEN, RESAMPLE_FILL_LIMIT, align,
};
pub use diurnal::{CorrectedSeries, DEFAULT_DIURNAL_WINDOW, DiurnalConfig};
pub use error::SeriesError;
pub use fill::{FillDirection, fill_linear};
pub use period::{PERIOD_ESTIMATE_ROWS, SamplingPeriod, estimate_period};
pub use record::{
    Geographic, ObservatoryRecord, ObservatorySeries, Projected, Reading, Series, SurveyRecord,
    SurveySeries, Timestamped,
};
pub use residual::{
    ClipRange, DEFAULT_ID_SEED, ResidualConfig, ResidualRecord, ResidualSeries, Signal,
    generate_row_ids,
};
pub use window::{
    DEFAULT_AMBIENT_WINDOW, DEFAULT_OBSERVED_WINDOW, SmoothingWindow, SmoothingWindowSpec,
    rolling_mean,
};
