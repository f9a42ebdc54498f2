//! Delaunay triangulation of scattered points (Bowyer-Watson).
//!
//! Points are inserted in Morton order into a super triangle. Each insertion
//! walks from the previous triangle to the one containing the new point,
//! grows the cavity of triangles whose circumcircle holds the point through
//! the adjacency links, and re-triangulates the cavity as a fan around it.
//! Geometric predicates run on coordinates normalised to the unit square.

use tracing::debug;

use crate::error::GridError;

/// Barycentric coordinates below `-CONTAINS_TOL` mean "outside the triangle".
const CONTAINS_TOL: f64 = 1e-9;

/// Points closer than this (in normalised units) are treated as duplicates.
const DUPLICATE_TOL: f64 = 1e-12;

/// Triangles with a smaller normalised doubled area are dropped as slivers.
const SLIVER_TOL: f64 = 1e-14;

/// Super triangle enclosing the unit square with a wide margin.
const SUPER_TRIANGLE: [[f64; 2]; 3] = [[-50.0, -50.0], [150.0, -50.0], [-50.0, 150.0]];

#[derive(Debug, Clone)]
struct Face {
    v: [usize; 3],
    /// `n[i]` is the face across the edge opposite `v[i]`.
    n: [Option<usize>; 3],
    alive: bool,
}

/// A triangulation of a point set. Triangles are counter-clockwise and refer
/// to indices of the input slice.
#[derive(Debug, Clone)]
pub struct Triangulation {
    vertices: Vec<[f64; 2]>,
    triangles: Vec<[usize; 3]>,
    n_duplicates: usize,
}

impl Triangulation {
    /// Build the Delaunay triangulation of `points`.
    ///
    /// Coincident points after the first are ignored.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GridError::DataInsufficient`] | Fewer than 3 points |
    /// | [`GridError::NonFinitePoint`] | A coordinate is not finite |
    /// | [`GridError::InterpolationFit`] | All points coincide or are collinear |
    pub fn new(points: &[[f64; 2]]) -> Result<Self, GridError> {
        if points.len() < 3 {
            return Err(GridError::DataInsufficient {
                stage: "triangulation",
                needed: 3,
                got: points.len(),
            });
        }
        if let Some(index) = points.iter().position(|p| !(p[0].is_finite() && p[1].is_finite())) {
            return Err(GridError::NonFinitePoint { index });
        }

        let (min_x, max_x, min_y, max_y) = points.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
            |(a, b, c, d), p| (a.min(p[0]), b.max(p[0]), c.min(p[1]), d.max(p[1])),
        );
        let scale = (max_x - min_x).max(max_y - min_y);
        if scale <= 0.0 {
            return Err(GridError::InterpolationFit {
                reason: "all points coincide".to_owned(),
            });
        }

        let n = points.len();
        let mut coords: Vec<[f64; 2]> = points
            .iter()
            .map(|p| [(p[0] - min_x) / scale, (p[1] - min_y) / scale])
            .collect();
        coords.extend_from_slice(&SUPER_TRIANGLE);

        let mut builder = Builder {
            coords,
            faces: vec![Face {
                v: [n, n + 1, n + 2],
                n: [None; 3],
                alive: true,
            }],
            seen: Vec::new(),
            bad: Vec::new(),
            stamp: 0,
            last: 0,
        };

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| morton(builder.coords[i]));
        let mut n_duplicates = 0usize;
        for i in order {
            if !builder.insert(i) {
                n_duplicates += 1;
            }
        }

        let triangles: Vec<[usize; 3]> = builder
            .faces
            .iter()
            .filter(|f| f.alive && f.v.iter().all(|&v| v < n))
            .filter(|f| {
                let [a, b, c] = f.v;
                orient(builder.coords[a], builder.coords[b], builder.coords[c]) > SLIVER_TOL
            })
            .map(|f| f.v)
            .collect();

        if triangles.is_empty() {
            return Err(GridError::InterpolationFit {
                reason: "points are collinear".to_owned(),
            });
        }

        debug!(
            n_points = n,
            n_triangles = triangles.len(),
            n_duplicates,
            "built Delaunay triangulation"
        );
        Ok(Self {
            vertices: points.to_vec(),
            triangles,
            n_duplicates,
        })
    }

    /// Return the vertex coordinates, in input order.
    #[must_use]
    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    /// Return the triangles as counter-clockwise vertex index triples.
    #[must_use]
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Return the number of input points ignored as duplicates.
    #[must_use]
    pub fn n_duplicates(&self) -> usize {
        self.n_duplicates
    }

    /// Barycentric coordinates of `(x, y)` with respect to triangle `tri`.
    #[must_use]
    pub fn barycentric(&self, tri: usize, x: f64, y: f64) -> [f64; 3] {
        let [a, b, c] = self.triangles[tri];
        let [x0, y0] = self.vertices[a];
        let [x1, y1] = self.vertices[b];
        let [x2, y2] = self.vertices[c];
        let det = (y1 - y2) * (x0 - x2) + (x2 - x1) * (y0 - y2);
        let l0 = ((y1 - y2) * (x - x2) + (x2 - x1) * (y - y2)) / det;
        let l1 = ((y2 - y0) * (x - x2) + (x0 - x2) * (y - y2)) / det;
        [l0, l1, 1.0 - l0 - l1]
    }

    /// Return barycentric coordinates if `(x, y)` lies in triangle `tri`
    /// (boundary included, with a small tolerance).
    #[must_use]
    pub fn contains(&self, tri: usize, x: f64, y: f64) -> Option<[f64; 3]> {
        let l = self.barycentric(tri, x, y);
        l.iter().all(|&v| v >= -CONTAINS_TOL).then_some(l)
    }

    /// Find a triangle containing `(x, y)` by scanning all triangles.
    #[must_use]
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, [f64; 3])> {
        (0..self.triangles.len()).find_map(|t| self.contains(t, x, y).map(|l| (t, l)))
    }

    /// Axis-aligned bounds `(min_x, max_x, min_y, max_y)` of triangle `tri`.
    #[must_use]
    pub fn bounds(&self, tri: usize) -> (f64, f64, f64, f64) {
        self.triangles[tri].iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
            |(a, b, c, d), &v| {
                let [x, y] = self.vertices[v];
                (a.min(x), b.max(x), c.min(y), d.max(y))
            },
        )
    }

    /// Estimate the gradient of `values` at each vertex as the area-weighted
    /// mean of the plane gradients of its incident triangles.
    ///
    /// Vertices not used by any triangle get a zero gradient.
    #[must_use]
    pub fn vertex_gradients(&self, values: &[f64]) -> Vec<[f64; 2]> {
        let mut sums = vec![[0.0_f64; 2]; self.vertices.len()];
        let mut weights = vec![0.0_f64; self.vertices.len()];
        for &[a, b, c] in &self.triangles {
            let [x0, y0] = self.vertices[a];
            let [x1, y1] = self.vertices[b];
            let [x2, y2] = self.vertices[c];
            let d = (x1 - x0) * (y2 - y0) - (x2 - x0) * (y1 - y0);
            let (df1, df2) = (values[b] - values[a], values[c] - values[a]);
            let gx = (df1 * (y2 - y0) - df2 * (y1 - y0)) / d;
            let gy = (df2 * (x1 - x0) - df1 * (x2 - x0)) / d;
            let area = d.abs() / 2.0;
            for v in [a, b, c] {
                sums[v][0] += area * gx;
                sums[v][1] += area * gy;
                weights[v] += area;
            }
        }
        sums.iter()
            .zip(&weights)
            .map(|(s, &w)| if w > 0.0 { [s[0] / w, s[1] / w] } else { [0.0, 0.0] })
            .collect()
    }
}

struct Builder {
    coords: Vec<[f64; 2]>,
    faces: Vec<Face>,
    seen: Vec<usize>,
    bad: Vec<usize>,
    stamp: usize,
    last: usize,
}

impl Builder {
    /// Insert vertex `p`. Returns false if it duplicates an existing vertex.
    fn insert(&mut self, p: usize) -> bool {
        let pt = self.coords[p];
        let start = self.locate(pt);
        if self.faces[start]
            .v
            .iter()
            .any(|&v| dist2(self.coords[v], pt) < DUPLICATE_TOL * DUPLICATE_TOL)
        {
            return false;
        }

        self.stamp += 1;
        self.seen.resize(self.faces.len(), 0);
        self.bad.resize(self.faces.len(), 0);

        let mut cavity = vec![start];
        let mut stack = vec![start];
        self.seen[start] = self.stamp;
        self.bad[start] = self.stamp;
        while let Some(f) = stack.pop() {
            for nb in self.faces[f].n.into_iter().flatten() {
                if self.seen[nb] == self.stamp {
                    continue;
                }
                self.seen[nb] = self.stamp;
                let [a, b, c] = self.faces[nb].v;
                if in_circle(self.coords[a], self.coords[b], self.coords[c], pt) {
                    self.bad[nb] = self.stamp;
                    cavity.push(nb);
                    stack.push(nb);
                }
            }
        }

        // boundary edges (a, b) of the cavity, counter-clockwise, with the
        // face outside the edge and the cavity face that owned it
        let mut boundary = Vec::new();
        for &f in &cavity {
            let face = &self.faces[f];
            for i in 0..3 {
                let outer = face.n[i];
                if outer.is_some_and(|o| self.bad[o] == self.stamp) {
                    continue;
                }
                boundary.push((face.v[(i + 1) % 3], face.v[(i + 2) % 3], outer, f));
            }
        }

        let first_new = self.faces.len();
        let mut by_start = std::collections::HashMap::with_capacity(boundary.len());
        let mut by_end = std::collections::HashMap::with_capacity(boundary.len());
        for (k, &(a, b, outer, owner)) in boundary.iter().enumerate() {
            let id = first_new + k;
            self.faces.push(Face {
                v: [a, b, p],
                n: [None, None, outer],
                alive: true,
            });
            if let Some(o) = outer {
                for slot in &mut self.faces[o].n {
                    if *slot == Some(owner) {
                        *slot = Some(id);
                    }
                }
            }
            by_start.insert(a, id);
            by_end.insert(b, id);
        }
        for id in first_new..self.faces.len() {
            let [a, b, _] = self.faces[id].v;
            self.faces[id].n[0] = by_start.get(&b).copied();
            self.faces[id].n[1] = by_end.get(&a).copied();
        }

        for &f in &cavity {
            self.faces[f].alive = false;
        }
        self.last = first_new;
        true
    }

    /// Walk from the last inserted face towards `pt`.
    fn locate(&self, pt: [f64; 2]) -> usize {
        let mut f = if self.faces[self.last].alive { self.last } else { self.alive_face() };
        let limit = self.faces.len() + 16;
        for step in 0..limit {
            let face = &self.faces[f];
            let mut next = None;
            for k in 0..3 {
                let i = (k + step) % 3;
                let a = self.coords[face.v[(i + 1) % 3]];
                let b = self.coords[face.v[(i + 2) % 3]];
                if orient(a, b, pt) < 0.0
                    && let Some(nb) = face.n[i]
                {
                    next = Some(nb);
                    break;
                }
            }
            match next {
                Some(nb) => f = nb,
                None => return f,
            }
        }
        // the walk cycled on a degenerate configuration; fall back to a scan
        self.faces
            .iter()
            .enumerate()
            .filter(|(_, face)| face.alive)
            .find(|(_, face)| {
                let [a, b, c] = face.v.map(|v| self.coords[v]);
                orient(a, b, pt) >= 0.0 && orient(b, c, pt) >= 0.0 && orient(c, a, pt) >= 0.0
            })
            .map_or(f, |(i, _)| i)
    }

    fn alive_face(&self) -> usize {
        self.faces.iter().rposition(|f| f.alive).unwrap_or(0)
    }
}

/// Twice the signed area of `(a, b, c)`; positive when counter-clockwise.
fn orient(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// True if `d` lies strictly inside the circumcircle of counter-clockwise `(a, b, c)`.
fn in_circle(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> bool {
    in_circle_det(a, b, c, d) > 0.0
}

fn in_circle_det(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> f64 {
    let (adx, ady) = (a[0] - d[0], a[1] - d[1]);
    let (bdx, bdy) = (b[0] - d[0], b[1] - d[1]);
    let (cdx, cdy) = (c[0] - d[0], c[1] - d[1]);
    (adx * adx + ady * ady) * (bdx * cdy - cdx * bdy)
        + (bdx * bdx + bdy * bdy) * (cdx * ady - adx * cdy)
        + (cdx * cdx + cdy * cdy) * (adx * bdy - bdx * ady)
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

/// Z-order key of a point in the unit square.
fn morton(p: [f64; 2]) -> u32 {
    let quantize = |v: f64| (v.clamp(0.0, 1.0) * f64::from(u16::MAX)) as u32;
    spread(quantize(p[0])) | (spread(quantize(p[1])) << 1)
}

fn spread(mut v: u32) -> u32 {
    v &= 0x0000_ffff;
    v = (v | (v << 8)) & 0x00ff_00ff;
    v = (v | (v << 4)) & 0x0f0f_0f0f;
    v = (v | (v << 2)) & 0x3333_3333;
    (v | (v << 1)) & 0x5555_5555
}
