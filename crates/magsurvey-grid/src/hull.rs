//! Convex hull of a point set (Andrew's monotone chain).

/// Relative tolerance for point-in-hull tests, scaled by the hull extent.
const HULL_TOL: f64 = 1e-9;

/// A convex polygon with counter-clockwise vertices.
///
/// Degenerate inputs are kept: a single point or a segment is a valid hull
/// and [`contains`](Self::contains) tests against it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexHull {
    vertices: Vec<[f64; 2]>,
    tolerance: f64,
}

impl ConvexHull {
    /// Compute the hull of `points`, skipping non-finite coordinates.
    #[must_use]
    pub fn new(points: &[[f64; 2]]) -> Self {
        let mut pts: Vec<[f64; 2]> = points
            .iter()
            .copied()
            .filter(|p| p[0].is_finite() && p[1].is_finite())
            .collect();
        pts.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
        pts.dedup();

        let extent = pts
            .iter()
            .fold(None, |acc: Option<(f64, f64, f64, f64)>, p| {
                Some(match acc {
                    None => (p[0], p[0], p[1], p[1]),
                    Some((a, b, c, d)) => (a.min(p[0]), b.max(p[0]), c.min(p[1]), d.max(p[1])),
                })
            })
            .map_or(0.0, |(a, b, c, d)| (b - a).max(d - c));
        let tolerance = HULL_TOL * extent.max(1.0);

        if pts.len() < 3 {
            return Self {
                vertices: pts,
                tolerance,
            };
        }

        let mut lower: Vec<[f64; 2]> = Vec::with_capacity(pts.len());
        for &p in &pts {
            while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
                lower.pop();
            }
            lower.push(p);
        }
        let mut upper: Vec<[f64; 2]> = Vec::with_capacity(pts.len());
        for &p in pts.iter().rev() {
            while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
                upper.pop();
            }
            upper.push(p);
        }
        lower.pop();
        upper.pop();
        lower.extend(upper);

        Self {
            vertices: lower,
            tolerance,
        }
    }

    /// Return the hull vertices, counter-clockwise.
    #[must_use]
    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    /// Return true if `(x, y)` lies inside or on the hull boundary.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let p = [x, y];
        match self.vertices.as_slice() {
            [] => false,
            [a] => (a[0] - x).abs() <= self.tolerance && (a[1] - y).abs() <= self.tolerance,
            [a, b] => on_segment(*a, *b, p, self.tolerance),
            vertices => {
                let n = vertices.len();
                (0..n).all(|i| {
                    let a = vertices[i];
                    let b = vertices[(i + 1) % n];
                    let len = ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2)).sqrt();
                    cross(a, b, p) >= -self.tolerance * len
                })
            }
        }
    }
}

fn cross(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

fn on_segment(a: [f64; 2], b: [f64; 2], p: [f64; 2], tolerance: f64) -> bool {
    let len = ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2)).sqrt();
    if cross(a, b, p).abs() > tolerance * len {
        return false;
    }
    let dot = (p[0] - a[0]) * (b[0] - a[0]) + (p[1] - a[1]) * (b[1] - a[1]);
    dot >= -tolerance * len && dot <= len * len + tolerance * len
}
