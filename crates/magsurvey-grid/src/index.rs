//! Uniform bucket index for fixed-radius proximity queries.

use std::collections::HashMap;

/// Points bucketed into square cells of side `cell_size`.
///
/// A radius query with `radius <= cell_size` only has to visit the 3x3 block
/// of buckets around the query point.
#[derive(Debug, Clone)]
pub struct PointIndex {
    cell_size: f64,
    buckets: HashMap<(i64, i64), Vec<[f64; 2]>>,
}

impl PointIndex {
    /// Build an index over `points`, skipping non-finite coordinates.
    ///
    /// `cell_size` must be positive and finite.
    #[must_use]
    pub fn new(points: &[[f64; 2]], cell_size: f64) -> Self {
        let mut buckets: HashMap<(i64, i64), Vec<[f64; 2]>> = HashMap::new();
        for &p in points {
            if p[0].is_finite() && p[1].is_finite() {
                buckets.entry(key(p, cell_size)).or_default().push(p);
            }
        }
        Self { cell_size, buckets }
    }

    /// Return the bucket side length.
    #[must_use]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Return true if any indexed point lies within `radius` of `(x, y)`.
    #[must_use]
    pub fn any_within(&self, x: f64, y: f64, radius: f64) -> bool {
        let reach = (radius / self.cell_size).ceil().max(1.0) as i64;
        let (kx, ky) = key([x, y], self.cell_size);
        let r2 = radius * radius;
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                if let Some(bucket) = self.buckets.get(&(kx + dx, ky + dy))
                    && bucket
                        .iter()
                        .any(|p| (p[0] - x).powi(2) + (p[1] - y).powi(2) <= r2)
                {
                    return true;
                }
            }
        }
        false
    }
}

fn key(p: [f64; 2], cell_size: f64) -> (i64, i64) {
    (
        (p[0] / cell_size).floor() as i64,
        (p[1] / cell_size).floor() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_points_across_bucket_edges() {
        let index = PointIndex::new(&[[99.0, 0.0]], 100.0);
        assert!(index.any_within(101.0, 0.0, 100.0));
        assert!(index.any_within(-0.5, 0.0, 100.0));
        assert!(!index.any_within(200.0, 0.0, 100.0));
    }

    #[test]
    fn radius_is_inclusive() {
        let index = PointIndex::new(&[[0.0, 0.0]], 5.0);
        assert!(index.any_within(3.0, 4.0, 5.0));
        assert!(!index.any_within(3.0, 4.01, 5.0));
    }

    #[test]
    fn larger_radius_visits_more_buckets() {
        let index = PointIndex::new(&[[0.0, 0.0]], 10.0);
        assert!(index.any_within(35.0, 0.0, 40.0));
    }

    #[test]
    fn matches_brute_force() {
        let points: Vec<[f64; 2]> = (0..200)
            .map(|i| [((i * 37) % 500) as f64, ((i * 91) % 500) as f64])
            .collect();
        let index = PointIndex::new(&points, 30.0);
        for qx in (0..500).step_by(23) {
            for qy in (0..500).step_by(29) {
                let (x, y) = (qx as f64, qy as f64);
                let brute = points
                    .iter()
                    .any(|p| (p[0] - x).powi(2) + (p[1] - y).powi(2) <= 900.0);
                assert_eq!(index.any_within(x, y, 30.0), brute, "query ({x}, {y})");
            }
        }
    }
}
