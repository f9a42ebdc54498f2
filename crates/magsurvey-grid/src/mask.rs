//! Spatial masking of interpolated grids, and the interpolate-then-mask job.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::budget::Budget;
use crate::error::GridError;
use crate::grid::{DEFAULT_MAX_CELLS, GridCell, InterpolationGrid, ScatteredPoint, value_range};
use crate::hull::ConvexHull;
use crate::index::PointIndex;
use crate::interpolator::{InterpolationKind, InterpolatorConfig};
use crate::region::validate_spacing;

/// Default distance beyond which grid cells are dropped.
pub const DEFAULT_MAX_DISTANCE: f64 = 400.0;

/// Default number of cells per masking chunk.
pub const DEFAULT_CHUNK_ROWS: usize = 500_000;

/// Default number of masking worker threads.
pub const DEFAULT_WORKERS: usize = 6;

fn coordinates(points: &[ScatteredPoint]) -> Vec<[f64; 2]> {
    points.iter().map(|p| [p.easting, p.northing]).collect()
}

fn validate_distance(distance: f64) -> Result<(), GridError> {
    if distance.is_finite() && distance > 0.0 {
        Ok(())
    } else {
        Err(GridError::InvalidDistance { distance })
    }
}

/// Set every cell whose centre lies outside the convex hull of `points` to `NaN`.
///
/// The hull boundary counts as inside.
#[must_use]
pub fn mask_convex_hull(grid: &InterpolationGrid, points: &[ScatteredPoint]) -> InterpolationGrid {
    let hull = ConvexHull::new(&coordinates(points));
    let masked = grid.masked(|x, y| hull.contains(x, y));
    debug!(
        hull_vertices = hull.vertices().len(),
        n_before = grid.n_valid(),
        n_after = masked.n_valid(),
        "convex hull mask"
    );
    masked
}

/// Set every cell farther than `max_distance` from all `points` to `NaN`.
///
/// # Errors
///
/// Returns [`GridError::InvalidDistance`] if `max_distance` is not positive and finite.
pub fn mask_distance(
    grid: &InterpolationGrid,
    points: &[ScatteredPoint],
    max_distance: f64,
) -> Result<InterpolationGrid, GridError> {
    validate_distance(max_distance)?;
    let index = PointIndex::new(&coordinates(points), max_distance);
    Ok(grid.masked(|x, y| index.any_within(x, y, max_distance)))
}

/// Keep cells whose value lies in `[lo, hi]`.
#[must_use]
pub fn filter_value_range(cells: Vec<GridCell>, lo: f64, hi: f64) -> Vec<GridCell> {
    cells
        .into_iter()
        .filter(|c| c.value >= lo && c.value <= hi)
        .collect()
}

/// Distance masking over the flattened valid cells, in fixed-size chunks on a
/// dedicated worker pool.
///
/// # Defaults
///
/// | Parameter    | Default                          |
/// |--------------|----------------------------------|
/// | `chunk_rows` | [`DEFAULT_CHUNK_ROWS`] (500,000) |
/// | `workers`    | [`DEFAULT_WORKERS`] (6)          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiledMasker {
    chunk_rows: usize,
    workers: usize,
}

impl TiledMasker {
    /// Create a masker. Zero values are raised to 1.
    #[must_use]
    pub fn new(chunk_rows: usize, workers: usize) -> Self {
        Self {
            chunk_rows: chunk_rows.max(1),
            workers: workers.max(1),
        }
    }

    /// Return the chunk size in cells.
    #[must_use]
    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Return the worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Return the valid cells of `grid` within `max_distance` of a point, in
    /// row-major order.
    ///
    /// Chunks are processed in parallel and reassembled in their original
    /// order. The first failing chunk fails the call.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GridError::InvalidDistance`] | `max_distance` is not positive and finite |
    /// | [`GridError::WorkerPool`] | The thread pool cannot be built |
    /// | [`GridError::Cancelled`] / [`GridError::TimedOut`] | `budget` ran out |
    #[instrument(skip_all, fields(chunk_rows = self.chunk_rows, workers = self.workers, max_distance = max_distance))]
    pub fn mask(
        &self,
        grid: &InterpolationGrid,
        points: &[ScatteredPoint],
        max_distance: f64,
        budget: &Budget,
    ) -> Result<Vec<GridCell>, GridError> {
        validate_distance(max_distance)?;
        let cells = grid.cells();
        let index = PointIndex::new(&coordinates(points), max_distance);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|source| GridError::WorkerPool { source })?;

        let n_chunks = cells.len().div_ceil(self.chunk_rows);
        let chunks: Vec<Vec<GridCell>> = pool.install(|| {
            cells
                .par_chunks(self.chunk_rows)
                .map(|chunk| {
                    budget.check()?;
                    Ok(chunk
                        .iter()
                        .filter(|c| index.any_within(c.easting, c.northing, max_distance))
                        .copied()
                        .collect())
                })
                .collect::<Result<_, GridError>>()
        })?;

        let kept: Vec<GridCell> = chunks.into_iter().flatten().collect();
        debug!(n_chunks, n_before = cells.len(), n_after = kept.len(), "distance mask");
        Ok(kept)
    }
}

impl Default for TiledMasker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_ROWS, DEFAULT_WORKERS)
    }
}

/// Parameters for [`interpolate_and_mask`].
///
/// # Defaults
///
/// | Parameter      | Default                          |
/// |----------------|----------------------------------|
/// | `max_distance` | [`DEFAULT_MAX_DISTANCE`] (400)   |
/// | `masker`       | [`TiledMasker::default`]         |
/// | `max_cells`    | [`DEFAULT_MAX_CELLS`] (10⁸)      |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridJob {
    kind: InterpolationKind,
    spacing: f64,
    max_distance: f64,
    masker: TiledMasker,
    max_cells: u64,
}

impl GridJob {
    /// Create a job for `kind` at grid `spacing`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidSpacing`] if `spacing` is not positive and finite.
    pub fn new(kind: InterpolationKind, spacing: f64) -> Result<Self, GridError> {
        validate_spacing(spacing)?;
        Ok(Self {
            kind,
            spacing,
            max_distance: DEFAULT_MAX_DISTANCE,
            masker: TiledMasker::default(),
            max_cells: DEFAULT_MAX_CELLS,
        })
    }

    /// Set the distance mask radius.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidDistance`] if `max_distance` is not positive and finite.
    pub fn with_max_distance(mut self, max_distance: f64) -> Result<Self, GridError> {
        validate_distance(max_distance)?;
        self.max_distance = max_distance;
        Ok(self)
    }

    /// Set the chunked masker.
    #[must_use]
    pub fn with_masker(mut self, masker: TiledMasker) -> Self {
        self.masker = masker;
        self
    }

    /// Set the grid cell limit.
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

    /// Return the distance mask radius.
    #[must_use]
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Return the chunked masker.
    #[must_use]
    pub fn masker(&self) -> TiledMasker {
        self.masker
    }
}

/// Output of [`interpolate_and_mask`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedGrid {
    /// The masked grid; dropped cells are `NaN`.
    pub grid: InterpolationGrid,
    /// Surviving cells in row-major order.
    pub cells: Vec<GridCell>,
    /// Minimum and maximum of the input values, used to filter the cells.
    pub value_range: (f64, f64),
    /// Number of input points.
    pub n_input: usize,
    /// Number of points after block reduction.
    pub n_reduced: usize,
}

/// Interpolate `points` onto a grid and mask it.
///
/// Cells are dropped when outside the convex hull of the points, farther than
/// `max_distance` from every point, or outside the range of input values.
///
/// # Errors
///
/// Any error of [`InterpolatorConfig::fit`], [`Interpolator::grid`](crate::Interpolator::grid)
/// or [`TiledMasker::mask`].
#[instrument(skip_all, fields(kind = %job.kind, spacing = job.spacing, n_points = points.len()))]
pub fn interpolate_and_mask(
    points: &[ScatteredPoint],
    job: &GridJob,
    budget: &Budget,
) -> Result<MaskedGrid, GridError> {
    let interpolator = InterpolatorConfig::new(job.kind, job.spacing)?
        .with_max_cells(job.max_cells)
        .fit(points, budget)?;
    let region = interpolator.region();
    let grid = interpolator.grid(region, job.spacing, budget)?;
    let grid = mask_convex_hull(&grid, points);
    budget.check()?;

    let cells = job.masker.mask(&grid, points, job.max_distance, budget)?;
    let value_range = value_range(points.iter().map(|p| p.value)).ok_or(
        GridError::DataInsufficient {
            stage: "value range filter",
            needed: 1,
            got: 0,
        },
    )?;
    let cells = filter_value_range(cells, value_range.0, value_range.1);
    let grid = InterpolationGrid::from_cells(region, job.spacing, grid.width(), grid.height(), &cells)?;

    info!(
        width = grid.width(),
        height = grid.height(),
        n_cells = cells.len(),
        "grid interpolated and masked"
    );
    Ok(MaskedGrid {
        grid,
        cells,
        value_range,
        n_input: interpolator.n_input(),
        n_reduced: interpolator.n_reduced(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    fn unit_square() -> Vec<ScatteredPoint> {
        [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
            .iter()
            .map(|&(x, y)| ScatteredPoint::new(x, y, 1.0))
            .collect()
    }

    fn filled(region: Region, spacing: f64) -> InterpolationGrid {
        let (w, h) = region.grid_dimensions(spacing).unwrap();
        InterpolationGrid::from_values(region, spacing, w, h, vec![5.0; w * h]).unwrap()
    }

    #[test]
    fn hull_mask_keeps_square_and_drops_margin() {
        // centres at -0.5, 0, 0.5, 1, 1.5 on both axes
        let region = Region::new(-0.75, 1.75, -0.75, 1.75).unwrap();
        let grid = filled(region, 0.5);
        assert_eq!((grid.width(), grid.height()), (5, 5));

        let masked = mask_convex_hull(&grid, &unit_square());
        assert_eq!(masked.n_valid(), 9);
        for row in 0..5 {
            for col in 0..5 {
                let inside = (1..=3).contains(&row) && (1..=3).contains(&col);
                assert_eq!(!masked.get(row, col).unwrap().is_nan(), inside, "cell ({row}, {col})");
            }
        }
    }

    #[test]
    fn distance_mask_drops_far_cells() {
        let region = Region::new(0.0, 100.0, 0.0, 10.0).unwrap();
        let grid = filled(region, 10.0);
        let points = vec![ScatteredPoint::new(0.0, 5.0, 0.0)];
        let masked = mask_distance(&grid, &points, 30.0).unwrap();
        // centres at 5, 15, 25 are within 30 of the point
        assert_eq!(masked.n_valid(), 3);
        assert!(matches!(
            mask_distance(&grid, &points, -1.0),
            Err(GridError::InvalidDistance { .. })
        ));
    }

    #[test]
    fn masking_never_adds_cells() {
        let region = Region::new(0.0, 50.0, 0.0, 50.0).unwrap();
        let grid = filled(region, 5.0);
        let points = vec![
            ScatteredPoint::new(10.0, 10.0, 0.0),
            ScatteredPoint::new(40.0, 12.0, 0.0),
            ScatteredPoint::new(25.0, 45.0, 0.0),
        ];
        let hull = mask_convex_hull(&grid, &points);
        let both = mask_distance(&hull, &points, 12.0).unwrap();
        assert!(hull.n_valid() <= grid.n_valid());
        assert!(both.n_valid() <= hull.n_valid());
        for (a, b) in hull.values().iter().zip(both.values()) {
            assert!(!(a.is_nan() && !b.is_nan()));
        }
    }

    #[test]
    fn chunked_mask_matches_whole_grid_mask() {
        let region = Region::new(0.0, 200.0, 0.0, 100.0).unwrap();
        let grid = filled(region, 2.0);
        let points: Vec<ScatteredPoint> = (0..40)
            .map(|i| ScatteredPoint::new((i * 37 % 200) as f64, (i * 53 % 100) as f64, 0.0))
            .collect();
        let whole = mask_distance(&grid, &points, 9.0).unwrap().cells();
        let chunked = TiledMasker::new(97, 3)
            .mask(&grid, &points, 9.0, &Budget::unlimited())
            .unwrap();
        assert_eq!(whole, chunked);
    }

    #[test]
    fn cancelled_chunk_fails_the_call() {
        let region = Region::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let grid = filled(region, 1.0);
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let budget = Budget::unlimited().with_cancel_flag(flag);
        let result = TiledMasker::new(10, 2).mask(&grid, &unit_square(), 5.0, &budget);
        assert!(matches!(result, Err(GridError::Cancelled)));
    }

    #[test]
    fn value_range_filter_is_inclusive() {
        let cell = |value| GridCell {
            row: 0,
            col: 0,
            easting: 0.0,
            northing: 0.0,
            value,
        };
        let kept = filter_value_range(vec![cell(0.9), cell(1.0), cell(2.0), cell(2.1)], 1.0, 2.0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn job_validates_parameters() {
        assert!(GridJob::new(InterpolationKind::Linear, f64::NAN).is_err());
        let job = GridJob::new(InterpolationKind::Linear, 20.0).unwrap();
        assert_eq!(job.max_distance(), DEFAULT_MAX_DISTANCE);
        assert_eq!(job.masker(), TiledMasker::new(500_000, 6));
        assert!(job.with_max_distance(0.0).is_err());
        assert_eq!(TiledMasker::new(0, 0), TiledMasker::new(1, 1));
    }

    #[test]
    fn interpolate_and_mask_end_to_end() {
        let mut points = Vec::new();
        for i in 0..12 {
            for j in 0..12 {
                let (x, y) = (i as f64 * 10.0, j as f64 * 10.0);
                points.push(ScatteredPoint::new(x, y, 0.1 * x - 0.05 * y + 3.0));
            }
        }
        let job = GridJob::new(InterpolationKind::Linear, 10.0)
            .unwrap()
            .with_max_distance(15.0)
            .unwrap()
            .with_masker(TiledMasker::new(7, 2));
        let out = interpolate_and_mask(&points, &job, &Budget::unlimited()).unwrap();

        assert_eq!(out.n_input, 144);
        assert_eq!(out.n_reduced, 144);
        assert_eq!((out.grid.width(), out.grid.height()), (11, 11));
        assert_eq!(out.cells.len(), out.grid.n_valid());
        assert!(!out.cells.is_empty());
        let (lo, hi) = out.value_range;
        for c in &out.cells {
            assert!(c.value >= lo && c.value <= hi);
            assert!((c.value - (0.1 * c.easting - 0.05 * c.northing + 3.0)).abs() < 1e-6);
        }
    }
}
