//! Regression tests for interpolation and masking.
//!
//! Small synthetic point sets with hand-checkable answers, plus seeded random
//! surveys for the structural guarantees of the masking stages.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use magsurvey_grid::{
    Budget, GridError, GridJob, InterpolationGrid, InterpolationKind, InterpolatorConfig, Region,
    ScatteredPoint, TiledMasker, interpolate_and_mask, mask_convex_hull, mask_distance,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lattice(n: usize, step: f64, f: impl Fn(f64, f64) -> f64) -> Vec<ScatteredPoint> {
    let mut points = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            let (x, y) = (i as f64 * step, j as f64 * step);
            points.push(ScatteredPoint::new(x, y, f(x, y)));
        }
    }
    points
}

fn random_survey(n: usize, seed: u64) -> Vec<ScatteredPoint> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let x = rng.gen_range(0.0..1_000.0);
            let y = rng.gen_range(0.0..800.0);
            ScatteredPoint::new(x, y, (x * 0.01).sin() * 20.0 + y * 0.02)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

/// A 5x5 lattice sampling z = 2x + 3y: the linear interpolator must give the
/// plane back at every data point.
#[test]
fn linear_interpolator_reproduces_plane_at_data_points() {
    let points = lattice(5, 1.0, |x, y| 2.0 * x + 3.0 * y);
    let interpolator = InterpolatorConfig::new(InterpolationKind::Linear, 1.0)
        .unwrap()
        .fit(&points, &Budget::unlimited())
        .unwrap();

    assert_eq!(interpolator.n_reduced(), 25);
    for p in &points {
        assert_abs_diff_eq!(interpolator.predict(p.easting, p.northing), p.value, epsilon = 1e-3);
    }
}

#[test]
fn both_kinds_track_a_smooth_field() {
    let field = |x: f64, y: f64| (x / 20.0).sin() * (y / 20.0).cos() * 10.0;
    let points = lattice(40, 5.0, field);
    let budget = Budget::unlimited();

    for kind in [InterpolationKind::Linear, InterpolationKind::Cubic] {
        let interpolator = InterpolatorConfig::new(kind, 5.0)
            .unwrap()
            .fit(&points, &budget)
            .unwrap();
        let grid = interpolator
            .grid(interpolator.region(), 5.0, &budget)
            .unwrap();
        assert_eq!(grid.n_valid(), grid.width() * grid.height(), "{kind}");
        for cell in grid.cells() {
            let err = (cell.value - field(cell.easting, cell.northing)).abs();
            assert!(err < 1.0, "{kind}: error {err} at ({}, {})", cell.easting, cell.northing);
        }
    }
}

#[test]
fn gridding_is_deterministic() {
    let points = random_survey(2_000, 3);
    let job = GridJob::new(InterpolationKind::Cubic, 20.0)
        .unwrap()
        .with_max_distance(60.0)
        .unwrap();
    let a = interpolate_and_mask(&points, &job, &Budget::unlimited()).unwrap();
    let b = interpolate_and_mask(&points, &job, &Budget::unlimited()).unwrap();
    assert_eq!(a.cells, b.cells);
}

#[test]
fn cancelled_budget_stops_fit() {
    let flag = Arc::new(AtomicBool::new(true));
    let budget = Budget::unlimited().with_cancel_flag(flag);
    let result = InterpolatorConfig::new(InterpolationKind::Linear, 20.0)
        .unwrap()
        .fit(&random_survey(100, 1), &budget);
    assert!(matches!(result, Err(GridError::Cancelled)));
}

#[test]
fn expired_deadline_times_out() {
    let budget = Budget::unlimited().with_timeout(Duration::ZERO);
    let job = GridJob::new(InterpolationKind::Linear, 20.0).unwrap();
    let result = interpolate_and_mask(&random_survey(100, 2), &job, &budget);
    assert!(matches!(result, Err(GridError::TimedOut)));
}

// ---------------------------------------------------------------------------
// Masking
// ---------------------------------------------------------------------------

/// Four points on the unit square, gridded at 0.5 with a margin: the 3x3 block
/// of cells on the square keeps its values (corners and centre included), the
/// surrounding ring becomes no-data.
#[test]
fn convex_hull_of_unit_square() {
    let square: Vec<ScatteredPoint> = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
        .iter()
        .map(|&(x, y)| ScatteredPoint::new(x, y, 7.0))
        .collect();
    let region = Region::new(-0.75, 1.75, -0.75, 1.75).unwrap();
    let grid = InterpolationGrid::from_values(region, 0.5, 5, 5, vec![7.0; 25]).unwrap();

    let masked = mask_convex_hull(&grid, &square);

    for (row, col) in [(1, 1), (1, 3), (3, 1), (3, 3), (2, 2)] {
        assert_eq!(masked.get(row, col), Some(7.0), "cell ({row}, {col})");
    }
    for row in 0..5 {
        for col in 0..5 {
            if row == 0 || row == 4 || col == 0 || col == 4 {
                assert!(masked.get(row, col).unwrap().is_nan(), "cell ({row}, {col})");
            }
        }
    }
    assert_eq!(masked.n_valid(), 9);
}

#[test]
fn masking_only_removes_cells() {
    let points = random_survey(500, 5);
    let interpolator = InterpolatorConfig::new(InterpolationKind::Linear, 20.0)
        .unwrap()
        .fit(&points, &Budget::unlimited())
        .unwrap();
    let grid = interpolator
        .grid(interpolator.region(), 20.0, &Budget::unlimited())
        .unwrap();
    let hull = mask_convex_hull(&grid, &points);
    let near = mask_distance(&hull, &points, 30.0).unwrap();

    assert!(hull.n_valid() <= grid.n_valid());
    assert!(near.n_valid() <= hull.n_valid());
    for ((g, h), n) in grid.values().iter().zip(hull.values()).zip(near.values()) {
        if !n.is_nan() {
            assert_eq!(n, h);
        }
        if !h.is_nan() {
            assert_eq!(h, g);
        }
    }
}

/// Tightening the distance on an already masked grid never brings a cell
/// back, and the surviving cells are a subset of the looser mask.
#[test]
fn tighter_distance_mask_is_a_subset_of_looser() {
    let points = random_survey(400, 13);
    let interpolator = InterpolatorConfig::new(InterpolationKind::Linear, 20.0)
        .unwrap()
        .fit(&points, &Budget::unlimited())
        .unwrap();
    let grid = interpolator
        .grid(interpolator.region(), 20.0, &Budget::unlimited())
        .unwrap();

    let loose = mask_distance(&grid, &points, 60.0).unwrap();
    let tight = mask_distance(&loose, &points, 25.0).unwrap();
    let direct = mask_distance(&grid, &points, 25.0).unwrap();

    assert!(tight.n_valid() <= loose.n_valid());
    for ((l, t), d) in loose.values().iter().zip(tight.values()).zip(direct.values()) {
        if l.is_nan() {
            assert!(t.is_nan());
            assert!(d.is_nan());
        } else if !t.is_nan() {
            assert_eq!(t, l);
        }
        assert_eq!(t.is_nan(), d.is_nan());
    }
}

#[test]
fn chunk_size_and_workers_do_not_change_the_result() {
    let points = random_survey(800, 9);
    let interpolator = InterpolatorConfig::new(InterpolationKind::Linear, 10.0)
        .unwrap()
        .fit(&points, &Budget::unlimited())
        .unwrap();
    let grid = interpolator
        .grid(interpolator.region(), 10.0, &Budget::unlimited())
        .unwrap();

    let reference = mask_distance(&grid, &points, 25.0).unwrap().cells();
    for (chunk_rows, workers) in [(1, 1), (13, 2), (1_000, 6), (1_000_000, 3)] {
        let cells = TiledMasker::new(chunk_rows, workers)
            .mask(&grid, &points, 25.0, &Budget::unlimited())
            .unwrap();
        assert_eq!(cells, reference, "chunk_rows={chunk_rows} workers={workers}");
    }
}

#[test]
fn masked_cells_lie_near_points_and_in_value_range() {
    let points = random_survey(1_500, 21);
    let job = GridJob::new(InterpolationKind::Linear, 20.0)
        .unwrap()
        .with_max_distance(40.0)
        .unwrap()
        .with_masker(TiledMasker::new(250, 4));
    let out = interpolate_and_mask(&points, &job, &Budget::unlimited()).unwrap();

    let (lo, hi) = out.value_range;
    assert!(!out.cells.is_empty());
    assert_eq!(out.cells.len(), out.grid.n_valid());
    for c in &out.cells {
        assert!(c.value >= lo && c.value <= hi);
        let nearest = points
            .iter()
            .map(|p| (p.easting - c.easting).hypot(p.northing - c.northing))
            .fold(f64::INFINITY, f64::min);
        assert!(nearest <= 40.0);
    }
}
