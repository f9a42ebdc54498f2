//! Explicit parameters for every stage, with validation at construction.

use std::time::Duration;

use magsurvey_grid::{
    DEFAULT_CHUNK_ROWS, DEFAULT_MAX_DISTANCE, DEFAULT_WORKERS, GridJob, InterpolationKind,
    TiledMasker,
};
use magsurvey_series::{
    ClipRange, DEFAULT_AMBIENT_WINDOW, DEFAULT_DIURNAL_WINDOW, DEFAULT_ID_SEED,
    DEFAULT_OBSERVED_WINDOW, DiurnalConfig, ResidualConfig, ResidualRecord, Signal,
};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Finest grid spacing the pipeline accepts, in projection units.
pub const MIN_GRID_SPACING: f64 = 20.0;

/// Which residual column is gridded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueColumn {
    /// `Baseline`, the residual anomaly.
    #[default]
    Baseline,
    /// `Magnetic_Field_Smoothed`.
    Smoothed,
    /// `Magnetic_Field_Ambient`.
    Ambient,
    /// The clipped and masked input signal.
    Signal,
    /// The raw `Magnetic_Field`.
    MagneticField,
}

impl ValueColumn {
    /// Return the column value of a residual row.
    #[must_use]
    pub fn value(self, record: &ResidualRecord) -> f64 {
        match self {
            ValueColumn::Baseline => record.baseline,
            ValueColumn::Smoothed => record.magnetic_field_smoothed,
            ValueColumn::Ambient => record.magnetic_field_ambient,
            ValueColumn::Signal => record.signal,
            ValueColumn::MagneticField => record.record.magnetic_field,
        }
    }

    /// Return the snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueColumn::Baseline => "baseline",
            ValueColumn::Smoothed => "smoothed",
            ValueColumn::Ambient => "ambient",
            ValueColumn::Signal => "signal",
            ValueColumn::MagneticField => "magnetic_field",
        }
    }
}

/// Parameters for a pipeline run.
///
/// # Defaults
///
/// | Parameter         | Default                                  |
/// |-------------------|------------------------------------------|
/// | `diurnal_window`  | 100                                      |
/// | `observed_window` | 100                                      |
/// | `ambient_window`  | 500                                      |
/// | `clip`            | none                                     |
/// | `points_to_mask`  | none                                     |
/// | `seed`            | 42                                       |
/// | `signal`          | [`Signal::MagneticFieldCorrected`]       |
/// | `interpolation`   | [`InterpolationKind::Linear`]            |
/// | `grid_spacing`    | 20                                       |
/// | `max_distance`    | 400                                      |
/// | `value_column`    | [`ValueColumn::Baseline`]                |
/// | `chunk_rows`      | 500,000                                  |
/// | `workers`         | 6                                        |
/// | `stage_timeout`   | none                                     |
///
/// The corrected signal falls back to the raw field on rows that were never
/// corrected, so the default works with or without a diurnal stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    diurnal_window: usize,
    observed_window: usize,
    ambient_window: usize,
    clip: Option<ClipRange>,
    points_to_mask: Vec<usize>,
    seed: u64,
    signal: Signal,
    interpolation: InterpolationKind,
    grid_spacing: f64,
    max_distance: f64,
    value_column: ValueColumn,
    chunk_rows: usize,
    workers: usize,
    stage_timeout: Option<Duration>,
}

impl PipelineParams {
    /// Create parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            diurnal_window: DEFAULT_DIURNAL_WINDOW,
            observed_window: DEFAULT_OBSERVED_WINDOW,
            ambient_window: DEFAULT_AMBIENT_WINDOW,
            clip: None,
            points_to_mask: Vec::new(),
            seed: DEFAULT_ID_SEED,
            signal: Signal::MagneticFieldCorrected,
            interpolation: InterpolationKind::Linear,
            grid_spacing: MIN_GRID_SPACING,
            max_distance: DEFAULT_MAX_DISTANCE,
            value_column: ValueColumn::Baseline,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            workers: DEFAULT_WORKERS,
            stage_timeout: None,
        }
    }

    /// Set the observatory smoothing window.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if `window == 0`.
    pub fn with_diurnal_window(mut self, window: usize) -> Result<Self, PipelineError> {
        self.diurnal_window = positive("diurnal_window", window)?;
        Ok(self)
    }

    /// Set the residual smoothing windows.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if either window is zero.
    pub fn with_windows(mut self, observed: usize, ambient: usize) -> Result<Self, PipelineError> {
        self.observed_window = positive("observed_window", observed)?;
        self.ambient_window = positive("ambient_window", ambient)?;
        Ok(self)
    }

    /// Treat readings at or beyond `min` / `max` as spikes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Series`] if the range is empty or not finite.
    pub fn with_clip(mut self, min: f64, max: f64) -> Result<Self, PipelineError> {
        self.clip = Some(ClipRange::new(min, max)?);
        Ok(self)
    }

    /// Blank the given input rows before smoothing.
    #[must_use]
    pub fn with_points_to_mask(mut self, rows: impl IntoIterator<Item = usize>) -> Self {
        self.points_to_mask = rows.into_iter().collect();
        self
    }

    /// Set the row id seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the signal fed into residual extraction.
    #[must_use]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }

    /// Set the interpolation spline.
    #[must_use]
    pub fn with_interpolation(mut self, kind: InterpolationKind) -> Self {
        self.interpolation = kind;
        self
    }

    /// Set the grid spacing.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if `spacing` is not finite
    /// or is below [`MIN_GRID_SPACING`].
    pub fn with_grid_spacing(mut self, spacing: f64) -> Result<Self, PipelineError> {
        if !spacing.is_finite() || spacing < MIN_GRID_SPACING {
            return Err(PipelineError::InvalidParameter {
                name: "grid_spacing",
                reason: format!("must be at least {MIN_GRID_SPACING}, got {spacing}"),
            });
        }
        self.grid_spacing = spacing;
        Ok(self)
    }

    /// Set the distance mask radius.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if `distance` is not
    /// positive and finite.
    pub fn with_max_distance(mut self, distance: f64) -> Result<Self, PipelineError> {
        if !distance.is_finite() || distance <= 0.0 {
            return Err(PipelineError::InvalidParameter {
                name: "max_distance",
                reason: format!("must be positive and finite, got {distance}"),
            });
        }
        self.max_distance = distance;
        Ok(self)
    }

    /// Set the gridded column.
    #[must_use]
    pub fn with_value_column(mut self, column: ValueColumn) -> Self {
        self.value_column = column;
        self
    }

    /// Set the tiled masking layout.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if either value is zero.
    pub fn with_masking(mut self, chunk_rows: usize, workers: usize) -> Result<Self, PipelineError> {
        self.chunk_rows = positive("chunk_rows", chunk_rows)?;
        self.workers = positive("workers", workers)?;
        Ok(self)
    }

    /// Bound each stage's wall-clock time.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    /// Return the observatory smoothing window.
    #[must_use]
    pub fn diurnal_window(&self) -> usize {
        self.diurnal_window
    }

    /// Return the short residual window.
    #[must_use]
    pub fn observed_window(&self) -> usize {
        self.observed_window
    }

    /// Return the long residual window.
    #[must_use]
    pub fn ambient_window(&self) -> usize {
        self.ambient_window
    }

    /// Return the clip range, if any.
    #[must_use]
    pub fn clip(&self) -> Option<ClipRange> {
        self.clip
    }

    /// Return the rows blanked before smoothing.
    #[must_use]
    pub fn points_to_mask(&self) -> &[usize] {
        &self.points_to_mask
    }

    /// Return the row id seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return the residual input signal.
    #[must_use]
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Return the interpolation spline.
    #[must_use]
    pub fn interpolation(&self) -> InterpolationKind {
        self.interpolation
    }

    /// Return the grid spacing.
    #[must_use]
    pub fn grid_spacing(&self) -> f64 {
        self.grid_spacing
    }

    /// Return the distance mask radius.
    #[must_use]
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Return the gridded column.
    #[must_use]
    pub fn value_column(&self) -> ValueColumn {
        self.value_column
    }

    /// Return the masking chunk height, in cells.
    #[must_use]
    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Return the masking pool width.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Return the per-stage timeout, if any.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout
    }

    /// Build the diurnal stage configuration.
    #[must_use]
    pub fn diurnal_config(&self) -> DiurnalConfig {
        DiurnalConfig::new().with_smoothing_window(self.diurnal_window)
    }

    /// Build the residual stage configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Series`] if the windows or clip range are
    /// rejected.
    pub fn residual_config(&self) -> Result<ResidualConfig, PipelineError> {
        let mut config = ResidualConfig::new(self.observed_window, self.ambient_window)?
            .with_points_to_mask(self.points_to_mask.iter().copied())
            .with_seed(self.seed)
            .with_signal(self.signal);
        if let Some(clip) = self.clip {
            config = config.with_clip(clip.min(), clip.max())?;
        }
        Ok(config)
    }

    /// Build the gridding job.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Grid`] if the spacing or distance is rejected.
    pub fn grid_job(&self) -> Result<GridJob, PipelineError> {
        Ok(GridJob::new(self.interpolation, self.grid_spacing)?
            .with_max_distance(self.max_distance)?
            .with_masker(TiledMasker::new(self.chunk_rows, self.workers)))
    }

    /// Fingerprint of everything that changes residual output.
    pub(crate) fn residual_fingerprint(&self) -> String {
        let clip = self
            .clip
            .map_or_else(|| "none".to_string(), |c| format!("{},{}", c.min(), c.max()));
        let masked: Vec<String> = self.points_to_mask.iter().map(usize::to_string).collect();
        format!(
            "o{}:a{}:clip{clip}:mask{}:seed{}:{:?}",
            self.observed_window,
            self.ambient_window,
            masked.join(","),
            self.seed,
            self.signal
        )
    }

    /// Fingerprint of everything that changes grid output. The masking
    /// layout is left out because it never changes the result.
    pub(crate) fn grid_fingerprint(&self) -> String {
        format!(
            "{}:s{}:d{}:{}",
            self.interpolation,
            self.grid_spacing,
            self.max_distance,
            self.value_column.as_str()
        )
    }
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self::new()
    }
}

fn positive(name: &'static str, value: usize) -> Result<usize, PipelineError> {
    if value == 0 {
        return Err(PipelineError::InvalidParameter {
            name,
            reason: "must be at least 1".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let params = PipelineParams::default();
        assert_eq!(params.observed_window(), 100);
        assert_eq!(params.ambient_window(), 500);
        assert_eq!(params.diurnal_window(), 100);
        assert_eq!(params.interpolation(), InterpolationKind::Linear);
        assert_eq!(params.grid_spacing(), 20.0);
        assert_eq!(params.max_distance(), 400.0);
        assert_eq!(params.chunk_rows(), 500_000);
        assert_eq!(params.workers(), 6);
        assert!(params.stage_timeout().is_none());
        assert!(params.clip().is_none());
    }

    #[test]
    fn rejects_fine_spacing() {
        assert!(matches!(
            PipelineParams::new().with_grid_spacing(10.0),
            Err(PipelineError::InvalidParameter { name: "grid_spacing", .. })
        ));
        assert!(PipelineParams::new().with_grid_spacing(f64::NAN).is_err());
        assert!(PipelineParams::new().with_grid_spacing(25.0).is_ok());
    }

    #[test]
    fn rejects_zero_windows_and_bad_clip() {
        assert!(PipelineParams::new().with_windows(0, 10).is_err());
        assert!(PipelineParams::new().with_diurnal_window(0).is_err());
        assert!(PipelineParams::new().with_masking(0, 2).is_err());
        assert!(matches!(
            PipelineParams::new().with_clip(5.0, 1.0),
            Err(PipelineError::Series(_))
        ));
        assert!(PipelineParams::new().with_max_distance(-1.0).is_err());
    }

    #[test]
    fn stage_configs_carry_the_parameters() {
        let params = PipelineParams::new()
            .with_windows(5, 25)
            .unwrap()
            .with_clip(-10.0, 10.0)
            .unwrap()
            .with_points_to_mask([3, 7])
            .with_interpolation(InterpolationKind::Cubic)
            .with_grid_spacing(40.0)
            .unwrap()
            .with_masking(100, 2)
            .unwrap();

        let residual = params.residual_config().unwrap();
        assert_eq!(residual.points_to_mask(), &[3, 7]);
        assert_eq!(residual.clip().unwrap().max(), 10.0);
        assert_eq!(residual.signal(), Signal::MagneticFieldCorrected);

        let job = params.grid_job().unwrap();
        assert_eq!(job.kind(), InterpolationKind::Cubic);
        assert_eq!(job.spacing(), 40.0);
        assert_eq!(job.masker().workers(), 2);
    }

    #[test]
    fn fingerprints_track_result_affecting_parameters() {
        let base = PipelineParams::new();
        let clipped = base.clone().with_clip(0.0, 1.0).unwrap();
        assert_ne!(base.residual_fingerprint(), clipped.residual_fingerprint());
        assert_eq!(base.grid_fingerprint(), clipped.grid_fingerprint());

        let relaid = base.clone().with_masking(10, 1).unwrap();
        assert_eq!(base.grid_fingerprint(), relaid.grid_fingerprint());
        let cubic = base.clone().with_interpolation(InterpolationKind::Cubic);
        assert_ne!(base.grid_fingerprint(), cubic.grid_fingerprint());
    }
}
