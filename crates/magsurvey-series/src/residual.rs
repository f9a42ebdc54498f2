//! Residual extraction: clip, mask, and remove the ambient trend.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::SeriesError;
use crate::fill::{FillDirection, fill_linear};
use crate::record::{Projected, Series, SurveyRecord, SurveySeries, Timestamped};
use crate::window::{SmoothingWindowSpec, rolling_mean};

/// Default seed for row id generation.
pub const DEFAULT_ID_SEED: u64 = 42;

/// Which survey value feeds the residual computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// The raw total field.
    #[default]
    MagneticField,
    /// The diurnally corrected field, or the raw field for rows without one.
    MagneticFieldCorrected,
}

impl Signal {
    fn value(self, record: &SurveyRecord) -> f64 {
        match self {
            Signal::MagneticField => record.magnetic_field,
            Signal::MagneticFieldCorrected => record
                .magnetic_field_corrected
                .unwrap_or(record.magnetic_field),
        }
    }
}

/// An open value range; readings at or beyond either bound are treated as spikes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRange {
    min: f64,
    max: f64,
}

impl ClipRange {
    /// Create a clip range.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::InvalidClipRange`] if either bound is not finite
    /// or `min >= max`.
    pub fn new(min: f64, max: f64) -> Result<Self, SeriesError> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(SeriesError::InvalidClipRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Return the lower bound.
    #[must_use]
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Return the upper bound.
    #[must_use]
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Return true if `value` lies strictly inside the range.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value > self.min && value < self.max
    }
}

/// Configuration for residual extraction.
///
/// # Defaults
///
/// | Parameter         | Default                          |
/// |-------------------|----------------------------------|
/// | `windows`         | observed 100 centred, ambient 500 trailing |
/// | `clip`            | none                             |
/// | `points_to_mask`  | none                             |
/// | `seed`            | [`DEFAULT_ID_SEED`] (42)         |
/// | `signal`          | [`Signal::MagneticField`]        |
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualConfig {
    windows: SmoothingWindowSpec,
    clip: Option<ClipRange>,
    points_to_mask: Vec<usize>,
    seed: u64,
    signal: Signal,
}

impl ResidualConfig {
    /// Create a configuration with the given observed and ambient window sizes.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::InvalidWindow`] if either size is zero.
    pub fn new(observed: usize, ambient: usize) -> Result<Self, SeriesError> {
        Ok(Self {
            windows: SmoothingWindowSpec::new(observed, ambient)?,
            ..Self::default()
        })
    }

    /// Discard readings outside `(min, max)` before smoothing.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::InvalidClipRange`] for an empty or non-finite range.
    pub fn with_clip(mut self, min: f64, max: f64) -> Result<Self, SeriesError> {
        self.clip = Some(ClipRange::new(min, max)?);
        Ok(self)
    }

    /// Discard the readings at these input row indices before smoothing.
    #[must_use]
    pub fn with_points_to_mask(mut self, points: impl IntoIterator<Item = usize>) -> Self {
        self.points_to_mask = points.into_iter().collect();
        self
    }

    /// Set the seed for row id generation.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Choose which survey value is smoothed.
    #[must_use]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }

    /// Return the smoothing windows.
    #[must_use]
    pub fn windows(&self) -> SmoothingWindowSpec {
        self.windows
    }

    /// Return the clip range, if any.
    #[must_use]
    pub fn clip(&self) -> Option<ClipRange> {
        self.clip
    }

    /// Return the masked input row indices.
    #[must_use]
    pub fn points_to_mask(&self) -> &[usize] {
        &self.points_to_mask
    }

    /// Return the id seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return the selected signal.
    #[must_use]
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Extract residuals from `survey`.
    ///
    /// Rows are given ids, sorted by time and deduplicated (first input
    /// occurrence wins). Clipped and masked readings are replaced by forward
    /// linear interpolation. The signal is then smoothed with the centred
    /// observed window, the result is smoothed again with the trailing
    /// ambient window, and `baseline = smoothed - ambient`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`SeriesError::DataInsufficient`] | `survey` is empty |
    #[instrument(skip_all, fields(n_rows = survey.len(), signal = ?self.signal))]
    pub fn extract(&self, survey: &SurveySeries) -> Result<ResidualSeries, SeriesError> {
        if survey.is_empty() {
            return Err(SeriesError::DataInsufficient {
                stage: "residual extraction",
                needed: 1,
                got: 0,
            });
        }

        let ids = generate_row_ids(self.seed, survey.len());
        let mut rows: Vec<(usize, &SurveyRecord)> = survey.records().iter().enumerate().collect();
        rows.sort_by_key(|(_, r)| r.datetime);
        let mut seen = HashSet::with_capacity(rows.len());
        rows.retain(|(_, r)| seen.insert(r.datetime));
        let n_duplicates = survey.len() - rows.len();
        if n_duplicates > 0 {
            debug!(n_duplicates, "dropped rows with repeated timestamps");
        }

        let mut signal: Vec<f64> = rows.iter().map(|(_, r)| self.signal.value(r)).collect();

        if let Some(clip) = self.clip {
            let mut n_clipped = 0usize;
            for v in &mut signal {
                if !clip.contains(*v) {
                    *v = f64::NAN;
                    n_clipped += 1;
                }
            }
            fill_linear(&mut signal, None, FillDirection::Forward);
            debug!(n_clipped, min = clip.min(), max = clip.max(), "clipped readings");
        }

        if !self.points_to_mask.is_empty() {
            let masked: HashSet<usize> = self
                .points_to_mask
                .iter()
                .copied()
                .filter(|&idx| {
                    let in_range = idx < survey.len();
                    if !in_range {
                        warn!(index = idx, n_rows = survey.len(), "ignoring out-of-range mask index");
                    }
                    in_range
                })
                .collect();
            for (v, (source_row, _)) in signal.iter_mut().zip(&rows) {
                if masked.contains(source_row) {
                    *v = f64::NAN;
                }
            }
            fill_linear(&mut signal, None, FillDirection::Forward);
            debug!(n_masked = masked.len(), "masked readings");
        }

        let smoothed = rolling_mean(&signal, self.windows.observed, 1);
        let ambient = rolling_mean(&smoothed, self.windows.ambient, 1);

        let records: Vec<ResidualRecord> = rows
            .into_iter()
            .enumerate()
            .map(|(i, (source_row, record))| ResidualRecord {
                id: ids[source_row],
                source_row,
                record: record.clone(),
                signal: signal[i],
                magnetic_field_smoothed: smoothed[i],
                magnetic_field_ambient: ambient[i],
                baseline: smoothed[i] - ambient[i],
            })
            .collect();

        info!(
            n_residuals = records.len(),
            observed = self.windows.observed.size(),
            ambient = self.windows.ambient.size(),
            "residual extraction complete"
        );
        Ok(Series::new(records))
    }
}

impl Default for ResidualConfig {
    fn default() -> Self {
        Self {
            windows: SmoothingWindowSpec::default(),
            clip: None,
            points_to_mask: Vec::new(),
            seed: DEFAULT_ID_SEED,
            signal: Signal::default(),
        }
    }
}

/// Generate `n` reproducible version-4 UUIDs from `seed`.
#[must_use]
pub fn generate_row_ids(seed: u64, n: usize) -> Vec<Uuid> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut bytes = [0u8; 16];
            rng.fill_bytes(&mut bytes);
            uuid::Builder::from_random_bytes(bytes).into_uuid()
        })
        .collect()
}

/// A survey row with its smoothed, ambient and residual values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualRecord {
    /// Stable row id.
    pub id: Uuid,
    /// Index of the row in the input series.
    pub source_row: usize,
    /// The input row, unchanged.
    pub record: SurveyRecord,
    /// The input signal after clipping and masking.
    pub signal: f64,
    /// Centred short-window mean of `signal`.
    pub magnetic_field_smoothed: f64,
    /// Trailing long-window mean of `magnetic_field_smoothed`.
    pub magnetic_field_ambient: f64,
    /// `magnetic_field_smoothed - magnetic_field_ambient`.
    pub baseline: f64,
}

impl ResidualRecord {
    /// Return the projected position of the underlying row.
    #[must_use]
    pub fn projected(&self) -> Option<Projected> {
        self.record.projected
    }
}

impl Timestamped for ResidualRecord {
    fn datetime(&self) -> NaiveDateTime {
        self.record.datetime
    }
}

/// Residual rows in time order.
pub type ResidualSeries = Series<ResidualRecord>;
