//! Rectangular map regions and grid dimensions.

use serde::{Deserialize, Serialize};

use crate::error::GridError;
use crate::grid::ScatteredPoint;

/// Tolerance applied before rounding a span/spacing ratio up, so spans that
/// are an exact multiple of the spacing do not gain a spurious column.
const CEIL_TOLERANCE: f64 = 1e-9;

/// An axis-aligned bounding box in projected coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Minimum easting.
    pub west: f64,
    /// Maximum easting.
    pub east: f64,
    /// Minimum northing.
    pub south: f64,
    /// Maximum northing.
    pub north: f64,
}

impl Region {
    /// Create a region.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidRegion`] if a bound is not finite or
    /// `west > east` or `south > north`.
    pub fn new(west: f64, east: f64, south: f64, north: f64) -> Result<Self, GridError> {
        let finite = [west, east, south, north].iter().all(|v| v.is_finite());
        if !finite || west > east || south > north {
            return Err(GridError::InvalidRegion {
                west,
                east,
                south,
                north,
            });
        }
        Ok(Self {
            west,
            east,
            south,
            north,
        })
    }

    /// Return the bounding box of `points`, or `None` for an empty slice.
    ///
    /// Non-finite coordinates are skipped.
    #[must_use]
    pub fn bounding(points: &[ScatteredPoint]) -> Option<Self> {
        let mut iter = points
            .iter()
            .filter(|p| p.easting.is_finite() && p.northing.is_finite());
        let first = iter.next()?;
        let init = Self {
            west: first.easting,
            east: first.easting,
            south: first.northing,
            north: first.northing,
        };
        Some(iter.fold(init, |r, p| Self {
            west: r.west.min(p.easting),
            east: r.east.max(p.easting),
            south: r.south.min(p.northing),
            north: r.north.max(p.northing),
        }))
    }

    /// Return the east-west extent.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Return the north-south extent.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Return true if `(easting, northing)` lies inside or on the boundary.
    #[must_use]
    pub fn contains(&self, easting: f64, northing: f64) -> bool {
        easting >= self.west && easting <= self.east && northing >= self.south && northing <= self.north
    }

    /// Number of columns and rows of a grid covering this region at `spacing`.
    ///
    /// Each is `max(1, ceil(extent / spacing))`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidSpacing`] if `spacing` is not positive and finite.
    pub fn grid_dimensions(&self, spacing: f64) -> Result<(usize, usize), GridError> {
        validate_spacing(spacing)?;
        let cells = |extent: f64| ((extent / spacing - CEIL_TOLERANCE).ceil().max(1.0)) as usize;
        Ok((cells(self.width()), cells(self.height())))
    }
}

/// Check that `spacing` is a positive finite number.
///
/// # Errors
///
/// Returns [`GridError::InvalidSpacing`] otherwise.
pub fn validate_spacing(spacing: f64) -> Result<(), GridError> {
    if spacing.is_finite() && spacing > 0.0 {
        Ok(())
    } else {
        Err(GridError::InvalidSpacing { spacing })
    }
}
