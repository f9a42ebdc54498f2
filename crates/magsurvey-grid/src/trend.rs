//! Second-degree polynomial trend surface, fitted by SVD least squares.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GridError;
use crate::grid::ScatteredPoint;

/// Number of polynomial terms for degree 2: `1, x, y, x², xy, y²`.
const N_TERMS: usize = 6;

/// Singular values below this are treated as zero in the least-squares solve.
const SVD_EPS: f64 = 1e-12;

/// A fitted surface `c0 + c1·x + c2·y + c3·x² + c4·x·y + c5·y²`.
///
/// Coordinates are centred on the data mean and divided by the largest
/// absolute offset before fitting, which keeps the normal equations well
/// conditioned for UTM-sized coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    center: (f64, f64),
    scale: f64,
    coefficients: [f64; N_TERMS],
}

impl Trend {
    /// Fit the trend to `points`.
    ///
    /// With fewer than six points the minimum-norm solution is returned.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GridError::DataInsufficient`] | `points` is empty |
    /// | [`GridError::InterpolationFit`] | The solve fails or yields non-finite coefficients |
    pub fn fit(points: &[ScatteredPoint]) -> Result<Self, GridError> {
        if points.is_empty() {
            return Err(GridError::DataInsufficient {
                stage: "trend fit",
                needed: 1,
                got: 0,
            });
        }

        let n = points.len() as f64;
        let cx = points.iter().map(|p| p.easting).sum::<f64>() / n;
        let cy = points.iter().map(|p| p.northing).sum::<f64>() / n;
        let max_offset = points
            .iter()
            .map(|p| (p.easting - cx).abs().max((p.northing - cy).abs()))
            .fold(0.0, f64::max);
        let scale = if max_offset > 0.0 { max_offset } else { 1.0 };

        let mut trend = Self {
            center: (cx, cy),
            scale,
            coefficients: [0.0; N_TERMS],
        };

        let design = DMatrix::from_fn(points.len(), N_TERMS, |i, j| {
            let (x, y) = trend.normalize(points[i].easting, points[i].northing);
            terms(x, y)[j]
        });
        let rhs = DVector::from_iterator(points.len(), points.iter().map(|p| p.value));

        let svd = design.svd(true, true);
        let solution = svd
            .solve(&rhs, SVD_EPS)
            .map_err(|reason| GridError::InterpolationFit {
                reason: format!("trend least squares: {reason}"),
            })?;

        for (c, s) in trend.coefficients.iter_mut().zip(solution.iter()) {
            *c = *s;
        }
        if trend.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(GridError::InterpolationFit {
                reason: "trend coefficients are not finite".to_owned(),
            });
        }

        debug!(coefficients = ?trend.coefficients, scale, "fitted polynomial trend");
        Ok(trend)
    }

    /// Evaluate the trend at `(easting, northing)`.
    #[must_use]
    pub fn predict(&self, easting: f64, northing: f64) -> f64 {
        let (x, y) = self.normalize(easting, northing);
        terms(x, y)
            .iter()
            .zip(&self.coefficients)
            .map(|(t, c)| t * c)
            .sum()
    }

    /// Return `points` with the trend subtracted from each value.
    #[must_use]
    pub fn detrend(&self, points: &[ScatteredPoint]) -> Vec<ScatteredPoint> {
        points
            .iter()
            .map(|p| ScatteredPoint {
                value: p.value - self.predict(p.easting, p.northing),
                ..*p
            })
            .collect()
    }

    fn normalize(&self, easting: f64, northing: f64) -> (f64, f64) {
        (
            (easting - self.center.0) / self.scale,
            (northing - self.center.1) / self.scale,
        )
    }
}

fn terms(x: f64, y: f64) -> [f64; N_TERMS] {
    [1.0, x, y, x * x, x * y, y * y]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample(f: impl Fn(f64, f64) -> f64) -> Vec<ScatteredPoint> {
        let mut points = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                let x = 650_000.0 + i as f64 * 37.0;
                let y = 7_300_000.0 + j as f64 * 41.0;
                points.push(ScatteredPoint::new(x, y, f(x, y)));
            }
        }
        points
    }

    #[test]
    fn reproduces_quadratic_surface() {
        let f = |x: f64, y: f64| {
            let (u, v) = ((x - 650_100.0) / 100.0, (y - 7_300_080.0) / 100.0);
            3.0 + 2.0 * u - v + 0.5 * u * u + 0.25 * u * v - 0.75 * v * v
        };
        let points = sample(f);
        let trend = Trend::fit(&points).unwrap();
        for p in &points {
            assert_abs_diff_eq!(trend.predict(p.easting, p.northing), p.value, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(
            trend.predict(650_050.0, 7_300_010.0),
            f(650_050.0, 7_300_010.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn detrended_plane_is_flat() {
        let points = sample(|x, y| 2.0 * x + 3.0 * y);
        let trend = Trend::fit(&points).unwrap();
        for p in trend.detrend(&points) {
            assert_abs_diff_eq!(p.value, 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn underdetermined_fit_still_interpolates() {
        let points = vec![
            ScatteredPoint::new(0.0, 0.0, 1.0),
            ScatteredPoint::new(1.0, 0.0, 2.0),
            ScatteredPoint::new(0.0, 1.0, 3.0),
        ];
        let trend = Trend::fit(&points).unwrap();
        for p in &points {
            assert_abs_diff_eq!(trend.predict(p.easting, p.northing), p.value, epsilon = 1e-9);
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            Trend::fit(&[]),
            Err(GridError::DataInsufficient { got: 0, .. })
        ));
    }
}
