//! Alignment of observatory readings onto survey timestamps.

use std::collections::HashSet;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::SeriesError;
use crate::fill::{FillDirection, fill_linear};
use crate::period::{SamplingPeriod, estimate_period};
use crate::record::{ObservatoryRecord, ObservatorySeries, SurveySeries, Timestamped};

/// Maximum consecutive missing samples filled on each side of a gap after resampling.
pub const RESAMPLE_FILL_LIMIT: usize = 5;

/// Default upper bound on the number of resampled observatory samples.
pub const DEFAULT_MAX_RESAMPLE_LEN: u64 = 50_000_000;

/// Configuration for [`align`].
///
/// # Defaults
///
/// | Parameter          | Default                       |
/// |--------------------|-------------------------------|
/// | `fill_limit`       | [`RESAMPLE_FILL_LIMIT`] (5)   |
/// | `max_resample_len` | [`DEFAULT_MAX_RESAMPLE_LEN`]  |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignConfig {
    fill_limit: usize,
    max_resample_len: u64,
}

impl AlignConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fill_limit: RESAMPLE_FILL_LIMIT,
            max_resample_len: DEFAULT_MAX_RESAMPLE_LEN,
        }
    }

    /// Set how many consecutive resampled gaps are filled from each side.
    #[must_use]
    pub fn with_fill_limit(mut self, fill_limit: usize) -> Self {
        self.fill_limit = fill_limit;
        self
    }

    /// Set the largest resample lattice that may be allocated.
    #[must_use]
    pub fn with_max_resample_len(mut self, max_resample_len: u64) -> Self {
        self.max_resample_len = max_resample_len;
        self
    }

    /// Return the gap fill limit.
    #[must_use]
    pub fn fill_limit(&self) -> usize {
        self.fill_limit
    }

    /// Return the resample size limit.
    #[must_use]
    pub fn max_resample_len(&self) -> u64 {
        self.max_resample_len
    }
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Observatory readings aligned onto survey timestamps.
///
/// Timestamps are unique, ascending, and a subset of the survey timestamps.
/// Values are `NaN` where resampling could not fill a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedObservatory {
    datetimes: Vec<NaiveDateTime>,
    magnetic_field: Vec<f64>,
    survey_period: SamplingPeriod,
    observatory_period: SamplingPeriod,
    resampled: bool,
}

impl AlignedObservatory {
    /// Return the aligned timestamps.
    #[must_use]
    pub fn datetimes(&self) -> &[NaiveDateTime] {
        &self.datetimes
    }

    /// Return the aligned field values, parallel to [`datetimes`](Self::datetimes).
    #[must_use]
    pub fn magnetic_field(&self) -> &[f64] {
        &self.magnetic_field
    }

    /// Return the estimated survey sampling period.
    #[must_use]
    pub fn survey_period(&self) -> SamplingPeriod {
        self.survey_period
    }

    /// Return the estimated observatory sampling period (before resampling).
    #[must_use]
    pub fn observatory_period(&self) -> SamplingPeriod {
        self.observatory_period
    }

    /// Return true if the observatory was resampled onto the survey period.
    #[must_use]
    pub fn resampled(&self) -> bool {
        self.resampled
    }

    /// Return the number of aligned samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.datetimes.len()
    }

    /// Return true if no observatory sample matched a survey timestamp.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datetimes.is_empty()
    }
}

/// Align an observatory series onto the timestamps of a survey series.
///
/// 1. Restrict the observatory to the survey time range.
/// 2. Estimate both sampling periods ([`estimate_period`]).
/// 3. If the periods differ, resample the observatory onto the survey period
///    (lattice anchored at midnight of the first observatory day), filling
///    gaps of up to `fill_limit` samples from either side.
/// 4. Keep only observatory samples whose timestamp appears in the survey.
///
/// Duplicate observatory timestamps are always resolved keep-first.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`SeriesError::DataInsufficient`] | Survey has < 2 rows, or < 2 observatory rows fall in the survey range |
/// | [`SeriesError::AlignmentMismatch`] | Time ranges are disjoint |
/// | [`SeriesError::DegeneratePeriod`] | Resampling is needed but the survey period is zero |
/// | [`SeriesError::ResampleTooLarge`] | The resample lattice exceeds `max_resample_len` |
#[instrument(skip_all, fields(n_survey = survey.len(), n_observatory = observatory.len()))]
pub fn align(
    survey: &SurveySeries,
    observatory: &ObservatorySeries,
    config: &AlignConfig,
) -> Result<AlignedObservatory, SeriesError> {
    let (survey_start, survey_end) = match survey.time_range() {
        Some(range) if survey.len() >= 2 => range,
        _ => {
            return Err(SeriesError::DataInsufficient {
                stage: "alignment",
                needed: 2,
                got: survey.len(),
            });
        }
    };
    let (observatory_start, observatory_end) =
        observatory
            .time_range()
            .ok_or(SeriesError::DataInsufficient {
                stage: "alignment",
                needed: 2,
                got: 0,
            })?;
    if observatory_end < survey_start || observatory_start > survey_end {
        return Err(SeriesError::AlignmentMismatch {
            survey_start,
            survey_end,
            observatory_start,
            observatory_end,
        });
    }

    let window = observatory.within(survey_start, survey_end).sorted_by_time();
    if window.len() < 2 {
        return Err(SeriesError::DataInsufficient {
            stage: "alignment",
            needed: 2,
            got: window.len(),
        });
    }

    let survey_period = estimate_period(survey.records())?;
    let observatory_period = estimate_period(window.records())?;
    debug!(%survey_period, %observatory_period, "estimated sampling periods");

    let deduped = window.dedup_by_time();
    let resampled = survey_period != observatory_period;
    let (datetimes, values) = if resampled {
        if survey_period.is_zero() {
            return Err(SeriesError::DegeneratePeriod);
        }
        resample(deduped.records(), survey_period, config)?
    } else {
        deduped
            .records()
            .iter()
            .map(|r| (r.datetime, r.magnetic_field))
            .unzip()
    };

    let survey_times: HashSet<NaiveDateTime> =
        survey.records().iter().map(Timestamped::datetime).collect();
    let (datetimes, magnetic_field): (Vec<_>, Vec<_>) = datetimes
        .into_iter()
        .zip(values)
        .filter(|(t, _)| survey_times.contains(t))
        .unzip();

    if datetimes.is_empty() {
        warn!("no observatory sample coincides with a survey timestamp");
    }
    info!(
        n_aligned = datetimes.len(),
        resampled,
        "observatory aligned to survey"
    );

    Ok(AlignedObservatory {
        datetimes,
        magnetic_field,
        survey_period,
        observatory_period,
        resampled,
    })
}

fn nanos_between(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    SamplingPeriod::from_delta(to - from).as_nanos()
}

/// Resample sorted, deduplicated readings onto a regular lattice.
fn resample(
    records: &[ObservatoryRecord],
    period: SamplingPeriod,
    config: &AlignConfig,
) -> Result<(Vec<NaiveDateTime>, Vec<f64>), SeriesError> {
    let step = period.as_nanos();
    let first = records[0].datetime;
    let last = records[records.len() - 1].datetime;
    let origin = first.date().and_hms_opt(0, 0, 0).unwrap_or(first);

    let start = origin + TimeDelta::nanoseconds(nanos_between(origin, first).div_euclid(step) * step);
    let len = (nanos_between(start, last) / step) as u64 + 1;
    if len > config.max_resample_len {
        return Err(SeriesError::ResampleTooLarge {
            len,
            max: config.max_resample_len,
        });
    }
    let len = len as usize;

    let mut values = vec![f64::NAN; len];
    let mut matched = 0usize;
    for r in records {
        let offset = nanos_between(start, r.datetime);
        if offset % step == 0 {
            let idx = (offset / step) as usize;
            if idx < len && values[idx].is_nan() {
                values[idx] = r.magnetic_field;
                matched += 1;
            }
        }
    }
    if matched == 0 {
        warn!(%period, "no observatory reading falls on the resample lattice");
    }

    let filled = fill_linear(&mut values, Some(config.fill_limit), FillDirection::Both);
    debug!(len, matched, filled, "observatory resampled");

    let datetimes = (0..len)
        .map(|k| start + TimeDelta::nanoseconds(k as i64 * step))
        .collect();
    Ok((datetimes, values))
}
