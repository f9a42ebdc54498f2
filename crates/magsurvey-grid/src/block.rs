//! Block reduction: average scattered points that share a grid bin.

use std::collections::BTreeMap;

use tracing::debug;

use crate::grid::ScatteredPoint;
use crate::region::Region;

#[derive(Default)]
struct Accumulator {
    easting: f64,
    northing: f64,
    value: f64,
    count: usize,
}

/// Average points falling in the same `spacing`-sized bin.
///
/// Bin indices are `floor((easting - west) / spacing)` and
/// `floor((northing - south) / spacing)`. Each output point carries the mean
/// coordinates and mean value of its bin. Output is ordered by
/// `(northing bin, easting bin)`, so the reduction is deterministic for a
/// given input regardless of point order. `spacing` must be positive.
#[must_use]
pub fn block_reduce(points: &[ScatteredPoint], region: &Region, spacing: f64) -> Vec<ScatteredPoint> {
    let mut bins: BTreeMap<(i64, i64), Accumulator> = BTreeMap::new();
    for p in points {
        let col = ((p.easting - region.west) / spacing).floor() as i64;
        let row = ((p.northing - region.south) / spacing).floor() as i64;
        let acc = bins.entry((row, col)).or_default();
        acc.easting += p.easting;
        acc.northing += p.northing;
        acc.value += p.value;
        acc.count += 1;
    }

    let reduced: Vec<ScatteredPoint> = bins
        .into_values()
        .map(|acc| {
            let n = acc.count as f64;
            ScatteredPoint::new(acc.easting / n, acc.northing / n, acc.value / n)
        })
        .collect();
    debug!(n_input = points.len(), n_blocks = reduced.len(), spacing, "block reduction");
    reduced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::new(0.0, 100.0, 0.0, 100.0).unwrap()
    }

    #[test]
    fn points_in_one_bin_are_averaged() {
        let points = vec![
            ScatteredPoint::new(1.0, 1.0, 10.0),
            ScatteredPoint::new(3.0, 5.0, 20.0),
            ScatteredPoint::new(8.0, 3.0, 30.0),
        ];
        let reduced = block_reduce(&points, &region(), 10.0);
        assert_eq!(reduced, vec![ScatteredPoint::new(4.0, 3.0, 20.0)]);
    }

    #[test]
    fn separate_bins_are_kept_in_row_major_order() {
        let points = vec![
            ScatteredPoint::new(55.0, 95.0, 3.0),
            ScatteredPoint::new(95.0, 5.0, 2.0),
            ScatteredPoint::new(5.0, 5.0, 1.0),
        ];
        let reduced = block_reduce(&points, &region(), 10.0);
        let values: Vec<f64> = reduced.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn order_of_input_does_not_matter() {
        let mut points: Vec<ScatteredPoint> = (0..50)
            .map(|i| ScatteredPoint::new((i * 7 % 100) as f64, (i * 13 % 100) as f64, i as f64))
            .collect();
        let a = block_reduce(&points, &region(), 25.0);
        points.reverse();
        let b = block_reduce(&points, &region(), 25.0);
        assert_eq!(a.len(), b.len());
        for (p, q) in a.iter().zip(&b) {
            assert!((p.value - q.value).abs() < 1e-9);
            assert!((p.easting - q.easting).abs() < 1e-9);
        }
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(block_reduce(&[], &region(), 10.0).is_empty());
    }
}
