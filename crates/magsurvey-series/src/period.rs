//! Sampling period estimation.

use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::SeriesError;
use crate::record::Timestamped;

/// Number of leading rows (after sorting) used to estimate a sampling period.
pub const PERIOD_ESTIMATE_ROWS: usize = 10_000;

/// A sampling period with nanosecond resolution.
///
/// Sub-second periods (e.g. 100 ms magnetometers) are represented exactly;
/// conversion to a sampling frequency is a direct division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SamplingPeriod(i64);

impl SamplingPeriod {
    /// Create a period from a nanosecond count.
    #[must_use]
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a period from a chrono duration, saturating on overflow.
    #[must_use]
    pub fn from_delta(delta: TimeDelta) -> Self {
        Self(delta.num_nanoseconds().unwrap_or(i64::MAX))
    }

    /// Return the period in nanoseconds.
    #[must_use]
    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Return the period as a chrono duration.
    #[must_use]
    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::nanoseconds(self.0)
    }

    /// Return the period in seconds.
    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Return the sampling frequency in hertz, or `None` for a zero period.
    #[must_use]
    pub fn frequency_hz(&self) -> Option<f64> {
        (self.0 > 0).then(|| 1e9 / self.0 as f64)
    }

    /// Return true if the period is zero (all sampled timestamps identical).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SamplingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0;
        if nanos % 1_000_000_000 == 0 {
            write!(f, "{}s", nanos / 1_000_000_000)
        } else if nanos % 1_000_000 == 0 {
            write!(f, "{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            write!(f, "{}us", nanos / 1_000)
        } else {
            write!(f, "{nanos}ns")
        }
    }
}

/// Estimate the sampling period of a series.
///
/// Sorts the timestamps, keeps the first [`PERIOD_ESTIMATE_ROWS`], and returns
/// the median of consecutive differences. For an even number of differences
/// the two middle values are averaged.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`SeriesError::DataInsufficient`] | Fewer than 2 rows |
pub fn estimate_period<R: Timestamped>(records: &[R]) -> Result<SamplingPeriod, SeriesError> {
    if records.len() < 2 {
        return Err(SeriesError::DataInsufficient {
            stage: "sampling period estimation",
            needed: 2,
            got: records.len(),
        });
    }

    let mut times: Vec<NaiveDateTime> = records.iter().map(Timestamped::datetime).collect();
    times.sort_unstable();
    times.truncate(PERIOD_ESTIMATE_ROWS);

    let mut deltas: Vec<i64> = times
        .windows(2)
        .map(|w| SamplingPeriod::from_delta(w[1] - w[0]).as_nanos())
        .collect();
    deltas.sort_unstable();

    let mid = deltas.len() / 2;
    let median = if deltas.len() % 2 == 0 {
        ((i128::from(deltas[mid - 1]) + i128::from(deltas[mid])) / 2) as i64
    } else {
        deltas[mid]
    };
    Ok(SamplingPeriod(median))
}
