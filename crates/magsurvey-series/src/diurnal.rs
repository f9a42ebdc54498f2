//! Diurnal correction of survey readings against an observatory baseline.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::align::{AlignConfig, align};
use crate::error::SeriesError;
use crate::record::{ObservatorySeries, SurveyRecord, SurveySeries};
use crate::window::{SmoothingWindow, rolling_mean};

/// Default smoothing window applied to the aligned observatory signal.
pub const DEFAULT_DIURNAL_WINDOW: usize = 100;

/// Configuration for diurnal correction.
///
/// # Defaults
///
/// | Parameter          | Default                           |
/// |--------------------|-----------------------------------|
/// | `smoothing_window` | [`DEFAULT_DIURNAL_WINDOW`] (100)  |
/// | `align`            | [`AlignConfig::default`]          |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiurnalConfig {
    smoothing_window: usize,
    align: AlignConfig,
}

impl DiurnalConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            smoothing_window: DEFAULT_DIURNAL_WINDOW,
            align: AlignConfig::default(),
        }
    }

    /// Set the centred smoothing window (in samples) for the observatory baseline.
    #[must_use]
    pub fn with_smoothing_window(mut self, smoothing_window: usize) -> Self {
        self.smoothing_window = smoothing_window;
        self
    }

    /// Set the alignment configuration.
    #[must_use]
    pub fn with_align_config(mut self, align: AlignConfig) -> Self {
        self.align = align;
        self
    }

    /// Return the observatory smoothing window.
    #[must_use]
    pub fn smoothing_window(&self) -> usize {
        self.smoothing_window
    }

    /// Return the alignment configuration.
    #[must_use]
    pub fn align_config(&self) -> &AlignConfig {
        &self.align
    }

    /// Correct `survey` for diurnal variation recorded in `observatory`.
    ///
    /// The observatory is aligned onto the survey, smoothed with a centred
    /// rolling mean, and de-meaned. Each surviving survey row gets
    /// `corrected = magnetic_field - |baseline(t)|`. The absolute value means
    /// the correction never raises a reading. Rows without a usable baseline
    /// keep their raw value and are flagged as fallbacks.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`SeriesError::InvalidWindow`] | `smoothing_window` is zero |
    /// | any error of [`align`](crate::align()) | alignment failed |
    #[instrument(skip_all, fields(n_survey = survey.len(), n_observatory = observatory.len()))]
    pub fn correct(
        &self,
        survey: &SurveySeries,
        observatory: &ObservatorySeries,
    ) -> Result<CorrectedSeries, SeriesError> {
        let window = SmoothingWindow::centered(self.smoothing_window)?;
        let aligned = align(survey, observatory, &self.align)?;

        let mut smoothed = rolling_mean(aligned.magnetic_field(), window, 1);
        let (sum, count) = smoothed
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        let mean = if count > 0 { sum / count as f64 } else { f64::NAN };
        for v in &mut smoothed {
            *v -= mean;
        }

        let baseline: HashMap<NaiveDateTime, f64> = aligned
            .datetimes()
            .iter()
            .copied()
            .zip(smoothed)
            .collect();

        let mut rows: Vec<&SurveyRecord> = survey
            .records()
            .iter()
            .filter(|r| baseline.contains_key(&r.datetime))
            .collect();
        rows.sort_by_key(|r| r.datetime);

        let mut records = Vec::with_capacity(rows.len());
        let mut fallback = Vec::with_capacity(rows.len());
        for row in rows {
            let offset = baseline.get(&row.datetime).copied().unwrap_or(f64::NAN);
            let mut corrected = row.magnetic_field - offset.abs();
            let used_fallback = !corrected.is_finite();
            if used_fallback {
                corrected = row.magnetic_field;
            }
            if !corrected.is_finite() {
                continue;
            }
            let mut record = row.clone();
            record.magnetic_field_corrected = Some(corrected);
            records.push(record);
            fallback.push(used_fallback);
        }

        let n_fallback = fallback.iter().filter(|&&f| f).count();
        info!(
            n_corrected = records.len(),
            n_fallback,
            resampled = aligned.resampled(),
            "diurnal correction complete"
        );

        Ok(CorrectedSeries {
            series: SurveySeries::new(records),
            fallback,
            resampled: aligned.resampled(),
            baseline_mean: mean,
        })
    }
}

impl Default for DiurnalConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of diurnal correction.
///
/// Every record carries `magnetic_field_corrected = Some(..)`. Rows are in
/// time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedSeries {
    series: SurveySeries,
    fallback: Vec<bool>,
    resampled: bool,
    baseline_mean: f64,
}

impl CorrectedSeries {
    /// Return the corrected survey series.
    #[must_use]
    pub fn series(&self) -> &SurveySeries {
        &self.series
    }

    /// Consume and return the corrected survey series.
    #[must_use]
    pub fn into_series(self) -> SurveySeries {
        self.series
    }

    /// Per-row flags, true where the raw field was used because no baseline
    /// value was available.
    #[must_use]
    pub fn fallback_flags(&self) -> &[bool] {
        &self.fallback
    }

    /// Return the number of rows that fell back to the raw field.
    #[must_use]
    pub fn n_fallback(&self) -> usize {
        self.fallback.iter().filter(|&&f| f).count()
    }

    /// Return true if the observatory had to be resampled.
    #[must_use]
    pub fn resampled(&self) -> bool {
        self.resampled
    }

    /// Mean of the smoothed observatory signal that was removed before correction.
    #[must_use]
    pub fn baseline_mean(&self) -> f64 {
        self.baseline_mean
    }
}
