//! Scattered input points, grid cells and the regular interpolation grid.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GridError;
use crate::region::{Region, validate_spacing};

/// Default upper bound on `width * height` for a single grid.
pub const DEFAULT_MAX_CELLS: u64 = 100_000_000;

/// A scattered observation `(easting, northing, value)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScatteredPoint {
    /// Projected x coordinate.
    pub easting: f64,
    /// Projected y coordinate.
    pub northing: f64,
    /// Observed value.
    pub value: f64,
}

impl ScatteredPoint {
    /// Create a point.
    #[must_use]
    pub fn new(easting: f64, northing: f64, value: f64) -> Self {
        Self {
            easting,
            northing,
            value,
        }
    }

    /// Return true if both coordinates and the value are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.easting.is_finite() && self.northing.is_finite() && self.value.is_finite()
    }
}

/// A single grid cell with its centre coordinate and value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    /// Row index, 0 = southernmost.
    pub row: usize,
    /// Column index, 0 = westernmost.
    pub col: usize,
    /// Easting of the cell centre.
    pub easting: f64,
    /// Northing of the cell centre.
    pub northing: f64,
    /// Cell value.
    pub value: f64,
}

/// A regular grid of values over a region; `NaN` marks "no data".
///
/// Values are row-major with row 0 the southernmost row. Columns and rows are
/// counted from the west and north edges of the region, so when the extent is
/// not a multiple of the spacing the grid overhangs the region to the east
/// and south.
///
/// Cell `(row, col)` is centred at
/// `(west + (col + 0.5) * spacing, north - (height - 1 - row + 0.5) * spacing)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationGrid {
    region: Region,
    spacing: f64,
    width: usize,
    height: usize,
    values: Vec<f64>,
}

impl InterpolationGrid {
    /// Create a grid covering `region` with every cell set to `NaN`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GridError::InvalidSpacing`] | `spacing` is not positive and finite |
    /// | [`GridError::GridTooLarge`] | `width * height > max_cells` |
    pub fn empty(region: Region, spacing: f64, max_cells: u64) -> Result<Self, GridError> {
        let (width, height) = region.grid_dimensions(spacing)?;
        let n_cells = (width as u64).saturating_mul(height as u64);
        if n_cells > max_cells {
            return Err(GridError::GridTooLarge {
                width: width as u64,
                height: height as u64,
                max_cells,
            });
        }
        Ok(Self {
            region,
            spacing,
            width,
            height,
            values: vec![f64::NAN; width * height],
        })
    }

    /// Wrap an existing row-major value buffer (row 0 = south).
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GridError::InvalidSpacing`] | `spacing` is not positive and finite |
    /// | [`GridError::GridTooLarge`] | `width * height` overflows `usize` |
    /// | [`GridError::ShapeMismatch`] | `values.len() != width * height` |
    pub fn from_values(
        region: Region,
        spacing: f64,
        width: usize,
        height: usize,
        values: Vec<f64>,
    ) -> Result<Self, GridError> {
        validate_spacing(spacing)?;
        let expected = width
            .checked_mul(height)
            .ok_or(GridError::GridTooLarge {
                width: width as u64,
                height: height as u64,
                max_cells: usize::MAX as u64,
            })?;
        if values.len() != expected {
            return Err(GridError::ShapeMismatch {
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            region,
            spacing,
            width,
            height,
            values,
        })
    }

    /// Re-grid a set of cells. Cells not listed are `NaN`; cells whose
    /// indices fall outside the grid are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidSpacing`] if `spacing` is not positive and finite.
    pub fn from_cells(
        region: Region,
        spacing: f64,
        width: usize,
        height: usize,
        cells: &[GridCell],
    ) -> Result<Self, GridError> {
        let mut grid = Self::from_values(region, spacing, width, height, vec![f64::NAN; width * height])?;
        let mut skipped = 0usize;
        for cell in cells {
            if cell.row < height && cell.col < width {
                grid.values[cell.row * width + cell.col] = cell.value;
            } else {
                skipped += 1;
            }
        }
        if skipped > 0 {
            debug!(skipped, width, height, "skipped cells outside the grid");
        }
        Ok(grid)
    }

    /// Return the region the grid was built for.
    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Return the cell size.
    #[must_use]
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Return the number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Return the number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Return the row-major values (row 0 = south).
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Return the value at `(row, col)`, or `None` when out of bounds.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        (row < self.height && col < self.width).then(|| self.values[row * self.width + col])
    }

    /// Return the easting of the centre of column `col`.
    #[must_use]
    pub fn easting_of(&self, col: usize) -> f64 {
        self.region.west + (col as f64 + 0.5) * self.spacing
    }

    /// Return the northing of the centre of row `row`.
    #[must_use]
    pub fn northing_of(&self, row: usize) -> f64 {
        self.region.north - ((self.height - 1 - row) as f64 + 0.5) * self.spacing
    }

    /// Return the `(easting, northing)` centre of cell `(row, col)`.
    #[must_use]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (self.easting_of(col), self.northing_of(row))
    }

    /// Continuous column coordinate of `easting` (cell centres are integers).
    pub(crate) fn col_coord(&self, easting: f64) -> f64 {
        (easting - self.region.west) / self.spacing - 0.5
    }

    /// Continuous row coordinate of `northing` (cell centres are integers).
    pub(crate) fn row_coord(&self, northing: f64) -> f64 {
        let south_edge = self.region.north - self.height as f64 * self.spacing;
        (northing - south_edge) / self.spacing - 0.5
    }

    /// Return the number of cells holding a value.
    #[must_use]
    pub fn n_valid(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }

    /// Return the valid cells in row-major order.
    #[must_use]
    pub fn cells(&self) -> Vec<GridCell> {
        let mut cells = Vec::with_capacity(self.n_valid());
        for row in 0..self.height {
            let northing = self.northing_of(row);
            for col in 0..self.width {
                let value = self.values[row * self.width + col];
                if !value.is_nan() {
                    cells.push(GridCell {
                        row,
                        col,
                        easting: self.easting_of(col),
                        northing,
                        value,
                    });
                }
            }
        }
        cells
    }

    /// Return the minimum and maximum valid value, or `None` if no cell has data.
    #[must_use]
    pub fn value_range(&self) -> Option<(f64, f64)> {
        value_range(self.values.iter().copied())
    }

    /// Return a copy where every cell for which `keep` returns false is `NaN`.
    #[must_use]
    pub fn masked(&self, mut keep: impl FnMut(f64, f64) -> bool) -> Self {
        let mut out = self.clone();
        for row in 0..self.height {
            let northing = self.northing_of(row);
            for col in 0..self.width {
                let idx = row * self.width + col;
                if !out.values[idx].is_nan() && !keep(self.easting_of(col), northing) {
                    out.values[idx] = f64::NAN;
                }
            }
        }
        out
    }
}

/// Return the minimum and maximum of the non-NaN values.
pub(crate) fn value_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.filter(|v| !v.is_nan()).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}
