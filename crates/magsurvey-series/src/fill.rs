//! Linear gap filling for series with missing samples.
//!
//! A sample is missing when it is not finite. Interpolation is by position,
//! which matches time-linear interpolation on a regularly sampled series.

/// Which side of a gap may be filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillDirection {
    /// Fill forward from the last valid sample. Leading gaps stay missing;
    /// trailing gaps take the last valid value.
    Forward,
    /// Fill from both sides. Leading gaps take the first valid value,
    /// trailing gaps the last one.
    Both,
}

/// Fill missing samples in place by linear interpolation between the
/// neighbouring valid samples.
///
/// With `limit = Some(k)`, only samples within `k` positions of a valid
/// sample (on an allowed side) are filled; the interpolated value still spans
/// the whole gap. Returns the number of samples filled.
pub fn fill_linear(values: &mut [f64], limit: Option<usize>, direction: FillDirection) -> usize {
    let n = values.len();
    if n == 0 {
        return 0;
    }

    // prev[i]: last valid index <= i; next[i]: first valid index >= i
    let mut prev = vec![None; n];
    let mut last = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_finite() {
            last = Some(i);
        }
        prev[i] = last;
    }
    let mut next = vec![None; n];
    let mut upcoming = None;
    for i in (0..n).rev() {
        if values[i].is_finite() {
            upcoming = Some(i);
        }
        next[i] = upcoming;
    }

    let within = |distance: usize| limit.is_none_or(|k| distance <= k);

    let mut filled = Vec::new();
    for i in 0..n {
        if values[i].is_finite() {
            continue;
        }
        let from_left = prev[i].filter(|&p| within(i - p));
        let from_right = match direction {
            FillDirection::Forward => None,
            FillDirection::Both => next[i].filter(|&q| within(q - i)),
        };
        if from_left.is_none() && from_right.is_none() {
            continue;
        }
        let value = match (prev[i], next[i]) {
            (Some(p), Some(q)) => {
                let t = (i - p) as f64 / (q - p) as f64;
                values[p] + (values[q] - values[p]) * t
            }
            (Some(p), None) => values[p],
            (None, Some(q)) => values[q],
            (None, None) => continue,
        };
        filled.push((i, value));
    }

    for &(i, value) in &filled {
        values[i] = value;
    }
    filled.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAN: f64 = f64::NAN;

    fn assert_values(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            if e.is_nan() {
                assert!(a.is_nan(), "index {i}: expected NaN, got {a}");
            } else {
                assert!((a - e).abs() < 1e-12, "index {i}: expected {e}, got {a}");
            }
        }
    }

    #[test]
    fn interior_gap_filled_linearly() {
        let mut v = vec![0.0, NAN, NAN, 3.0];
        let n = fill_linear(&mut v, None, FillDirection::Forward);
        assert_eq!(n, 2);
        assert_values(&v, &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn forward_leaves_leading_gap() {
        let mut v = vec![NAN, NAN, 2.0, NAN];
        fill_linear(&mut v, None, FillDirection::Forward);
        assert_values(&v, &[NAN, NAN, 2.0, 2.0]);
    }

    #[test]
    fn both_fills_leading_and_trailing() {
        let mut v = vec![NAN, 1.0, NAN, 3.0, NAN];
        fill_linear(&mut v, None, FillDirection::Both);
        assert_values(&v, &[1.0, 1.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn limit_both_directions_leaves_middle_of_long_gap() {
        // gap of 13 between 0 and 14, limit 5 from each side -> 3 stay missing
        let mut v = vec![NAN; 15];
        v[0] = 0.0;
        v[14] = 14.0;
        let n = fill_linear(&mut v, Some(5), FillDirection::Both);
        assert_eq!(n, 10);
        for i in 1..=5 {
            assert!((v[i] - i as f64).abs() < 1e-12);
        }
        for i in 6..=8 {
            assert!(v[i].is_nan(), "index {i} should stay missing");
        }
        for i in 9..=13 {
            assert!((v[i] - i as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn limit_forward_only_counts_from_left() {
        let mut v = vec![0.0, NAN, NAN, NAN, 4.0];
        fill_linear(&mut v, Some(1), FillDirection::Forward);
        assert_values(&v, &[0.0, 1.0, NAN, NAN, 4.0]);
    }

    #[test]
    fn all_missing_is_untouched() {
        let mut v = vec![NAN, NAN];
        assert_eq!(fill_linear(&mut v, None, FillDirection::Both), 0);
        assert!(v.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn empty_slice() {
        let mut v: Vec<f64> = vec![];
        assert_eq!(fill_linear(&mut v, Some(5), FillDirection::Both), 0);
    }
}
