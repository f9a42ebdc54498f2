//! Gridding, interpolation and spatial masking of scattered survey points.
//!
//! Pure computation library with zero I/O. Points are detrended with a
//! second-degree polynomial, block-reduced at the grid spacing, triangulated,
//! and evaluated cell by cell with a linear or cubic spline. Grids are then
//! masked by convex hull, distance to the nearest point, and value range.

mod block;
mod budget;
mod error;
mod grid;
mod hull;
mod index;
mod interpolator;
mod mask;
mod region;
mod trend;
mod triangulation;

pub use block::block_reduce;
pub use budget::Budget;
pub use error::GridError;
pub use grid::{DEFAULT_MAX_CELLS, GridCell, InterpolationGrid, ScatteredPoint};
pub use hull::ConvexHull;
pub use index::PointIndex;
pub use interpolator::{InterpolationKind, Interpolator, InterpolatorConfig};
pub use mask::{
    DEFAULT_CHUNK_ROWS, DEFAULT_MAX_DISTANCE, DEFAULT_WORKERS, GridJob, MaskedGrid, TiledMasker,
    filter_value_range, interpolate_and_mask, mask_convex_hull, mask_distance,
};
pub use region::{Region, validate_spacing};
pub use trend::Trend;
pub use triangulation::Triangulation;
