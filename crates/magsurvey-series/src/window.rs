//! Boxcar smoothing windows and NaN-aware rolling means.

use serde::{Deserialize, Serialize};

use crate::error::SeriesError;

/// Default short ("observed") smoothing window, in samples.
pub const DEFAULT_OBSERVED_WINDOW: usize = 100;

/// Default long ("ambient") smoothing window, in samples.
pub const DEFAULT_AMBIENT_WINDOW: usize = 500;

/// A boxcar window measured in samples, centred or trailing.
///
/// Window sizes are sample counts, not durations, so the smoothing is only
/// meaningful for near-uniformly sampled series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothingWindow {
    size: usize,
    centered: bool,
}

impl SmoothingWindow {
    /// Create a centred window.
    ///
    /// For an even size the window extends one sample further back than
    /// forward: `[i - size/2, i + size/2 - 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::InvalidWindow`] if `size` is zero.
    pub fn centered(size: usize) -> Result<Self, SeriesError> {
        Self::new(size, true)
    }

    /// Create a trailing window covering `[i - size + 1, i]`.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::InvalidWindow`] if `size` is zero.
    pub fn trailing(size: usize) -> Result<Self, SeriesError> {
        Self::new(size, false)
    }

    fn new(size: usize, centered: bool) -> Result<Self, SeriesError> {
        if size == 0 {
            return Err(SeriesError::InvalidWindow { size });
        }
        Ok(Self { size, centered })
    }

    /// Return the window size in samples.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Return true for a centred window.
    #[must_use]
    pub fn is_centered(&self) -> bool {
        self.centered
    }

    /// Half-open index range `[start, end)` covered at position `i` in a
    /// series of length `n`.
    fn bounds(&self, i: usize, n: usize) -> (usize, usize) {
        let end = if self.centered {
            i + (self.size - 1) / 2 + 1
        } else {
            i + 1
        };
        (end.saturating_sub(self.size), end.min(n))
    }
}

/// The observed/ambient window pair used for residual extraction.
///
/// The observed window is centred and tracks the local signal; the ambient
/// window is trailing and follows the slowly varying background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothingWindowSpec {
    /// Short, centred window.
    pub observed: SmoothingWindow,
    /// Long, trailing window.
    pub ambient: SmoothingWindow,
}

impl SmoothingWindowSpec {
    /// Create a spec with a centred observed window and a trailing ambient window.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::InvalidWindow`] if either size is zero.
    pub fn new(observed: usize, ambient: usize) -> Result<Self, SeriesError> {
        Ok(Self {
            observed: SmoothingWindow::centered(observed)?,
            ambient: SmoothingWindow::trailing(ambient)?,
        })
    }
}

impl Default for SmoothingWindowSpec {
    fn default() -> Self {
        Self {
            observed: SmoothingWindow {
                size: DEFAULT_OBSERVED_WINDOW,
                centered: true,
            },
            ambient: SmoothingWindow {
                size: DEFAULT_AMBIENT_WINDOW,
                centered: false,
            },
        }
    }
}

/// Compute a boxcar rolling mean that skips missing (non-finite) samples.
///
/// A position whose window holds fewer than `min_periods` valid samples is
/// `NaN`. With `min_periods = 1` edge positions are averaged over the
/// truncated window instead of being dropped.
#[must_use]
pub fn rolling_mean(values: &[f64], window: SmoothingWindow, min_periods: usize) -> Vec<f64> {
    let n = values.len();
    let min_periods = min_periods.max(1);

    // Prefix sums of deviations from a reference keep the partial sums small;
    // raw field values (~5e4 nT) would lose precision over long surveys.
    let reference = values.iter().copied().find(|v| v.is_finite()).unwrap_or(0.0);
    let mut sums = Vec::with_capacity(n + 1);
    let mut counts = Vec::with_capacity(n + 1);
    sums.push(0.0);
    counts.push(0usize);
    let (mut sum, mut count) = (0.0, 0usize);
    for &v in values {
        if v.is_finite() {
            sum += v - reference;
            count += 1;
        }
        sums.push(sum);
        counts.push(count);
    }

    (0..n)
        .map(|i| {
            let (start, end) = window.bounds(i, n);
            let valid = counts[end] - counts[start];
            if valid < min_periods {
                f64::NAN
            } else {
                reference + (sums[end] - sums[start]) / valid as f64
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn naive_mean(values: &[f64], start: usize, end: usize) -> f64 {
        let valid: Vec<f64> = values[start..end].iter().copied().filter(|v| v.is_finite()).collect();
        valid.iter().sum::<f64>() / valid.len() as f64
    }

    #[test]
    fn zero_window_rejected() {
        assert!(matches!(
            SmoothingWindow::centered(0),
            Err(SeriesError::InvalidWindow { size: 0 })
        ));
        assert!(SmoothingWindowSpec::new(100, 0).is_err());
    }

    #[test]
    fn default_spec_matches_constants() {
        let spec = SmoothingWindowSpec::default();
        assert_eq!(spec.observed.size(), DEFAULT_OBSERVED_WINDOW);
        assert!(spec.observed.is_centered());
        assert_eq!(spec.ambient.size(), DEFAULT_AMBIENT_WINDOW);
        assert!(!spec.ambient.is_centered());
        assert_eq!(spec, SmoothingWindowSpec::new(100, 500).unwrap());
    }

    #[test]
    fn centered_odd_window() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let m = rolling_mean(&v, SmoothingWindow::centered(3).unwrap(), 1);
        assert_abs_diff_eq!(m[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(m[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[2], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[4], 4.5, epsilon = 1e-12);
    }

    #[test]
    fn centered_even_window_leans_back() {
        // size 4 at i = 2 covers [0, 3]
        let v = [1.0, 2.0, 3.0, 4.0, 100.0];
        let m = rolling_mean(&v, SmoothingWindow::centered(4).unwrap(), 1);
        assert_abs_diff_eq!(m[2], 2.5, epsilon = 1e-12);
    }

    #[test]
    fn trailing_window() {
        let v = [2.0, 4.0, 6.0, 8.0];
        let m = rolling_mean(&v, SmoothingWindow::trailing(2).unwrap(), 1);
        assert_abs_diff_eq!(m[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[1], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[3], 7.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_samples_are_skipped() {
        let v = [1.0, f64::NAN, 3.0];
        let m = rolling_mean(&v, SmoothingWindow::centered(3).unwrap(), 1);
        assert_abs_diff_eq!(m[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn min_periods_marks_sparse_windows_missing() {
        let v = [1.0, f64::NAN, f64::NAN, f64::NAN, 5.0];
        let m = rolling_mean(&v, SmoothingWindow::centered(3).unwrap(), 1);
        assert!(m[2].is_nan());
        let m2 = rolling_mean(&v, SmoothingWindow::trailing(5).unwrap(), 2);
        assert!(m2[3].is_nan());
        assert_abs_diff_eq!(m2[4], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn matches_naive_mean_on_large_offsets() {
        let v: Vec<f64> = (0..2_000)
            .map(|i| 52_000.0 + (i as f64 * 0.37).sin() * 40.0)
            .collect();
        let w = SmoothingWindow::centered(101).unwrap();
        let m = rolling_mean(&v, w, 1);
        for i in [0usize, 50, 999, 1_950, 1_999] {
            let (s, e) = w.bounds(i, v.len());
            assert_abs_diff_eq!(m[i], naive_mean(&v, s, e), epsilon = 1e-8);
        }
    }

    #[test]
    fn window_larger_than_series() {
        let v = [1.0, 2.0, 3.0];
        let m = rolling_mean(&v, SmoothingWindow::trailing(500).unwrap(), 1);
        assert_abs_diff_eq!(m[2], 2.0, epsilon = 1e-12);
    }
}
