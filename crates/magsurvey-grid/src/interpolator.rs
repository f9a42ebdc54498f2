//! Trend + block-reduce + triangulated spline interpolation onto a grid.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::block::block_reduce;
use crate::budget::Budget;
use crate::error::GridError;
use crate::grid::{DEFAULT_MAX_CELLS, InterpolationGrid, ScatteredPoint};
use crate::region::{Region, validate_spacing};
use crate::trend::Trend;
use crate::triangulation::Triangulation;

/// Slack, in cell units, when mapping triangle bounds to grid rows and columns.
const INDEX_SLACK: f64 = 1e-9;

/// Spline used between the block-reduced points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationKind {
    /// Piecewise-linear over each triangle.
    #[default]
    Linear,
    /// Cubic Bézier patch over each triangle, from vertex values and gradients.
    Cubic,
}

impl InterpolationKind {
    /// Return the lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpolationKind::Linear => "linear",
            InterpolationKind::Cubic => "cubic",
        }
    }
}

impl fmt::Display for InterpolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for fitting an [`Interpolator`].
///
/// # Defaults
///
/// | Parameter   | Default                          |
/// |-------------|----------------------------------|
/// | `max_cells` | [`DEFAULT_MAX_CELLS`] (10⁸)      |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatorConfig {
    kind: InterpolationKind,
    spacing: f64,
    max_cells: u64,
}

impl InterpolatorConfig {
    /// Create a configuration for `kind` at grid `spacing`.
    ///
    /// The spacing also sets the block-reduction bin size.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidSpacing`] if `spacing` is not positive and finite.
    pub fn new(kind: InterpolationKind, spacing: f64) -> Result<Self, GridError> {
        validate_spacing(spacing)?;
        Ok(Self {
            kind,
            spacing,
            max_cells: DEFAULT_MAX_CELLS,
        })
    }

    /// Set the largest grid (in cells) the fitted interpolator may produce.
    #[must_use]
    pub fn with_max_cells(mut self, max_cells: u64) -> Self {
        self.max_cells = max_cells;
        self
    }

    /// Return the spline kind.
    #[must_use]
    pub fn kind(&self) -> InterpolationKind {
        self.kind
    }

    /// Return the grid spacing.
    #[must_use]
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Return the cell limit.
    #[must_use]
    pub fn max_cells(&self) -> u64 {
        self.max_cells
    }

    /// Fit an interpolator to `points`.
    ///
    /// A second-degree trend is removed, the residuals are block-reduced at
    /// the grid spacing, and the reduced points are triangulated.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GridError::DataInsufficient`] | Fewer than 3 points |
    /// | [`GridError::NonFinitePoint`] | A coordinate or value is not finite |
    /// | [`GridError::InterpolationFit`] | Trend solve fails, or the reduced points are too few or collinear |
    /// | [`GridError::Cancelled`] / [`GridError::TimedOut`] | `budget` ran out |
    #[instrument(skip_all, fields(kind = %self.kind, spacing = self.spacing, n_points = points.len()))]
    pub fn fit(&self, points: &[ScatteredPoint], budget: &Budget) -> Result<Interpolator, GridError> {
        if points.len() < 3 {
            return Err(GridError::DataInsufficient {
                stage: "interpolation",
                needed: 3,
                got: points.len(),
            });
        }
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(GridError::NonFinitePoint { index });
        }
        budget.check()?;

        let region = Region::bounding(points).ok_or(GridError::DataInsufficient {
            stage: "interpolation",
            needed: 3,
            got: 0,
        })?;
        let trend = Trend::fit(points)?;
        let residuals = trend.detrend(points);
        let reduced = block_reduce(&residuals, &region, self.spacing);
        budget.check()?;

        if reduced.len() < 3 {
            return Err(GridError::InterpolationFit {
                reason: format!(
                    "block reduction at spacing {} left {} points",
                    self.spacing,
                    reduced.len()
                ),
            });
        }
        let coords: Vec<[f64; 2]> = reduced.iter().map(|p| [p.easting, p.northing]).collect();
        let triangulation = Triangulation::new(&coords)?;
        let values: Vec<f64> = reduced.iter().map(|p| p.value).collect();
        let gradients = match self.kind {
            InterpolationKind::Linear => Vec::new(),
            InterpolationKind::Cubic => triangulation.vertex_gradients(&values),
        };

        info!(
            n_reduced = reduced.len(),
            n_triangles = triangulation.triangles().len(),
            "interpolator fitted"
        );
        Ok(Interpolator {
            kind: self.kind,
            region,
            spacing: self.spacing,
            max_cells: self.max_cells,
            trend,
            triangulation,
            values,
            gradients,
            n_input: points.len(),
        })
    }
}

/// A fitted interpolant: trend plus a spline over the triangulated residuals.
#[derive(Debug, Clone)]
pub struct Interpolator {
    kind: InterpolationKind,
    region: Region,
    spacing: f64,
    max_cells: u64,
    trend: Trend,
    triangulation: Triangulation,
    values: Vec<f64>,
    gradients: Vec<[f64; 2]>,
    n_input: usize,
}

impl Interpolator {
    /// Return the spline kind.
    #[must_use]
    pub fn kind(&self) -> InterpolationKind {
        self.kind
    }

    /// Return the bounding box of the fitted points.
    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Return the fit spacing.
    #[must_use]
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Return the number of input points.
    #[must_use]
    pub fn n_input(&self) -> usize {
        self.n_input
    }

    /// Return the number of points after block reduction.
    #[must_use]
    pub fn n_reduced(&self) -> usize {
        self.values.len()
    }

    /// Return the fitted trend.
    #[must_use]
    pub fn trend(&self) -> &Trend {
        &self.trend
    }

    /// Return the triangulation of the reduced points.
    #[must_use]
    pub fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    /// Evaluate at a single location; `NaN` outside the triangulation.
    ///
    /// Scans every triangle, so use [`grid`](Self::grid) for bulk evaluation.
    #[must_use]
    pub fn predict(&self, easting: f64, northing: f64) -> f64 {
        self.triangulation
            .locate(easting, northing)
            .map_or(f64::NAN, |(tri, bary)| {
                self.spline(tri, bary) + self.trend.predict(easting, northing)
            })
    }

    /// Evaluate on the grid covering `region` at `spacing`.
    ///
    /// Cells whose centre lies outside the triangulation are `NaN`. Rows are
    /// evaluated in parallel.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GridError::InvalidSpacing`] | `spacing` is not positive and finite |
    /// | [`GridError::GridTooLarge`] | The grid exceeds the configured cell limit |
    /// | [`GridError::Cancelled`] / [`GridError::TimedOut`] | `budget` ran out |
    #[instrument(skip_all, fields(kind = %self.kind, spacing = spacing))]
    pub fn grid(
        &self,
        region: Region,
        spacing: f64,
        budget: &Budget,
    ) -> Result<InterpolationGrid, GridError> {
        let mut grid = InterpolationGrid::empty(region, spacing, self.max_cells)?;
        let (width, height) = (grid.width(), grid.height());
        let eastings: Vec<f64> = (0..width).map(|c| grid.easting_of(c)).collect();
        let northings: Vec<f64> = (0..height).map(|r| grid.northing_of(r)).collect();

        // (triangle, first column, last column) for every row a triangle spans
        let mut rows: Vec<Vec<(usize, usize, usize)>> = vec![Vec::new(); height];
        for tri in 0..self.triangulation.triangles().len() {
            let (x0, x1, y0, y1) = self.triangulation.bounds(tri);
            let Some((c0, c1)) = index_span(grid.col_coord(x0), grid.col_coord(x1), width) else {
                continue;
            };
            let Some((r0, r1)) = index_span(grid.row_coord(y0), grid.row_coord(y1), height) else {
                continue;
            };
            for bucket in &mut rows[r0..=r1] {
                bucket.push((tri, c0, c1));
            }
        }
        budget.check()?;

        grid.values_mut()
            .par_chunks_mut(width)
            .enumerate()
            .try_for_each(|(row, out)| {
                budget.check()?;
                let y = northings[row];
                for &(tri, c0, c1) in &rows[row] {
                    for col in c0..=c1 {
                        if !out[col].is_nan() {
                            continue;
                        }
                        let x = eastings[col];
                        if let Some(bary) = self.triangulation.contains(tri, x, y) {
                            out[col] = self.spline(tri, bary) + self.trend.predict(x, y);
                        }
                    }
                }
                Ok::<(), GridError>(())
            })?;

        debug!(width, height, n_valid = grid.n_valid(), "grid evaluated");
        Ok(grid)
    }

    fn spline(&self, tri: usize, bary: [f64; 3]) -> f64 {
        let [a, b, c] = self.triangulation.triangles()[tri];
        let f = [self.values[a], self.values[b], self.values[c]];
        match self.kind {
            InterpolationKind::Linear => bary[0] * f[0] + bary[1] * f[1] + bary[2] * f[2],
            InterpolationKind::Cubic => {
                let vertices = self.triangulation.vertices();
                let p = [vertices[a], vertices[b], vertices[c]];
                let g = [self.gradients[a], self.gradients[b], self.gradients[c]];
                cubic_patch(p, f, g, bary)
            }
        }
    }
}

/// Integer index range covered by the continuous interval `[lo, hi]`,
/// clamped to `0..len`. `None` if the interval misses every index.
fn index_span(lo: f64, hi: f64, len: usize) -> Option<(usize, usize)> {
    let first = (lo - INDEX_SLACK).ceil().max(0.0);
    let last = (hi + INDEX_SLACK).floor().min(len as f64 - 1.0);
    (first <= last).then_some((first as usize, last as usize))
}

/// Evaluate the cubic Bézier triangle defined by vertex values `f` and
/// gradients `g` at barycentric coordinates `bary`.
///
/// Edge control points lie on the vertex tangent planes at one third of each
/// edge; the centre control point follows the quadratic-precision rule
/// `E + (E - V) / 2`.
fn cubic_patch(p: [[f64; 2]; 3], f: [f64; 3], g: [[f64; 2]; 3], bary: [f64; 3]) -> f64 {
    let edge = |i: usize, j: usize| {
        f[i] + (g[i][0] * (p[j][0] - p[i][0]) + g[i][1] * (p[j][1] - p[i][1])) / 3.0
    };
    let (b210, b201) = (edge(0, 1), edge(0, 2));
    let (b120, b021) = (edge(1, 0), edge(1, 2));
    let (b102, b012) = (edge(2, 0), edge(2, 1));
    let e = (b210 + b201 + b120 + b021 + b102 + b012) / 6.0;
    let v = (f[0] + f[1] + f[2]) / 3.0;
    let b111 = e + (e - v) / 2.0;

    let [u, s, w] = bary;
    u.powi(3) * f[0]
        + s.powi(3) * f[1]
        + w.powi(3) * f[2]
        + 3.0 * u * u * s * b210
        + 3.0 * u * u * w * b201
        + 3.0 * u * s * s * b120
        + 3.0 * s * s * w * b021
        + 3.0 * u * w * w * b102
        + 3.0 * s * w * w * b012
        + 6.0 * u * s * w * b111
}
