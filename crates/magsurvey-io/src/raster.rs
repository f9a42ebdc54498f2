//! Georeferenced raster export: a versioned binary band, an ESRI world file,
//! and the flattened cell table.
//!
//! The `.mgr` file is a bincode-encoded [`RasterEnvelope`]. Its band is stored
//! north-up (first row is the northernmost), so it is the vertical flip of the
//! in-memory [`InterpolationGrid`], whose row 0 is the southernmost.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use magsurvey_grid::{InterpolationGrid, Region};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::OutputName;
use crate::writer::{ensure_dir, stage, stage_csv};

/// Magic bytes at the start of every envelope.
pub const RASTER_MAGIC: [u8; 4] = *b"MGR\0";

/// Current envelope layout version.
pub const FORMAT_VERSION: u32 = 1;

/// The on-disk raster layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterEnvelope {
    /// Always [`RASTER_MAGIC`].
    pub magic: [u8; 4],
    /// Layout version; readers reject anything but [`FORMAT_VERSION`].
    pub format_version: u32,
    /// Columns.
    pub width: u64,
    /// Rows.
    pub height: u64,
    /// GDAL-style affine transform `[west, spacing, 0, north, 0, -spacing]`
    /// mapping pixel corners to world coordinates.
    pub transform: [f64; 6],
    /// Requested region `[west, east, south, north]`; the pixels may extend
    /// past `east` and below `south` by less than one cell.
    pub extent: [f64; 4],
    /// Cell values row by row, north to south; `NaN` is no data.
    pub band: Vec<f32>,
}

/// A raster read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    /// The grid, south row first.
    pub grid: InterpolationGrid,
    /// Affine transform as stored.
    pub transform: [f64; 6],
    /// Layout version as stored.
    pub format_version: u32,
}

/// Paths of the files written by [`RasterWriter::write`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RasterArtifacts {
    /// `<name>.mgr`
    pub raster: PathBuf,
    /// `<name>.wld`
    pub world_file: PathBuf,
    /// `<name>_grid.csv`
    pub cells: PathBuf,
}

/// Return the affine transform of `grid`.
#[must_use]
pub fn affine_transform(grid: &InterpolationGrid) -> [f64; 6] {
    let region = grid.region();
    let spacing = grid.spacing();
    [region.west, spacing, 0.0, region.north, 0.0, -spacing]
}

/// Render the six-line world file for `transform`.
///
/// World files locate the centre of the upper-left pixel, so the corner
/// origin is shifted by half a pixel.
#[must_use]
pub fn world_file(transform: &[f64; 6]) -> String {
    let [x0, dx, rx, y0, ry, dy] = *transform;
    format!(
        "{dx}\n{ry}\n{rx}\n{dy}\n{}\n{}\n",
        x0 + dx / 2.0,
        y0 + dy / 2.0
    )
}

/// Writes an [`InterpolationGrid`] as `<name>.mgr`, `<name>.wld` and
/// `<name>_grid.csv`.
///
/// All three files are staged before any is renamed into place. If staging
/// fails, no partial file is left behind.
pub struct RasterWriter {
    output_dir: PathBuf,
    name: OutputName,
}

impl RasterWriter {
    /// Create a new writer targeting the given directory and output name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    pub fn new(output_dir: &Path, name: OutputName) -> Result<Self, IoError> {
        ensure_dir(output_dir)?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            name,
        })
    }

    /// Write the raster, world file and cell table.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::RasterEncode`] | The envelope cannot be encoded |
    /// | [`IoError::TableEncode`] | A cell row cannot be encoded |
    /// | [`IoError::WriteFile`] | A file cannot be written or renamed |
    #[instrument(skip_all, fields(name = %self.name, width = grid.width(), height = grid.height()))]
    pub fn write(&self, grid: &InterpolationGrid) -> Result<RasterArtifacts, IoError> {
        let base = self.name.as_str();
        let raster_path = self.output_dir.join(format!("{base}.mgr"));
        let world_path = self.output_dir.join(format!("{base}.wld"));
        let cells_path = self.output_dir.join(format!("{base}_grid.csv"));

        let envelope = encode(grid);
        let raster = stage(&raster_path, |out| {
            bincode::serialize_into(out, &envelope).map_err(|e| IoError::RasterEncode {
                path: raster_path.clone(),
                source: e,
            })
        })?;
        let world = stage(&world_path, |out| {
            out.write_all(world_file(&envelope.transform).as_bytes())
                .map_err(|e| IoError::WriteFile {
                    path: world_path.clone(),
                    source: e,
                })
        })?;
        let cells = grid.cells();
        let table = stage_csv(&cells_path, &cells)?;
        debug!(n_cells = cells.len(), "raster staged");

        let artifacts = RasterArtifacts {
            raster: raster.commit()?,
            world_file: world.commit()?,
            cells: table.commit()?,
        };
        info!(path = %artifacts.raster.display(), "raster written");
        Ok(artifacts)
    }
}

fn encode(grid: &InterpolationGrid) -> RasterEnvelope {
    let region = grid.region();
    let width = grid.width();
    let band: Vec<f32> = grid
        .values()
        .chunks(width)
        .rev()
        .flatten()
        .map(|&v| v as f32)
        .collect();
    RasterEnvelope {
        magic: RASTER_MAGIC,
        format_version: FORMAT_VERSION,
        width: width as u64,
        height: grid.height() as u64,
        transform: affine_transform(grid),
        extent: [region.west, region.east, region.south, region.north],
        band,
    }
}

/// Read a `.mgr` raster and rebuild its grid.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | The file cannot be read |
/// | [`IoError::RasterDecode`] | The bytes are not an envelope |
/// | [`IoError::IncompatibleRaster`] | Wrong magic or version, or an inconsistent header |
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_raster(path: &Path) -> Result<Raster, IoError> {
    let bytes = fs::read(path).map_err(|e| IoError::FileNotFound {
        path: path.to_path_buf(),
        source: e,
    })?;
    let envelope: RasterEnvelope =
        bincode::deserialize(&bytes).map_err(|e| IoError::RasterDecode {
            path: path.to_path_buf(),
            source: e,
        })?;
    let incompatible = |reason: String| IoError::IncompatibleRaster {
        path: path.to_path_buf(),
        reason,
    };
    if envelope.magic != RASTER_MAGIC {
        return Err(incompatible("not a magsurvey raster".into()));
    }
    if envelope.format_version != FORMAT_VERSION {
        return Err(incompatible(format!(
            "format version {} (expected {FORMAT_VERSION})",
            envelope.format_version
        )));
    }

    let (width, height) = (
        usize::try_from(envelope.width).map_err(|_| incompatible("width overflows".into()))?,
        usize::try_from(envelope.height).map_err(|_| incompatible("height overflows".into()))?,
    );
    if width == 0 {
        return Err(incompatible("zero width".into()));
    }
    let [west, east, south, north] = envelope.extent;
    let region = Region::new(west, east, south, north).map_err(|e| incompatible(e.to_string()))?;
    let values: Vec<f64> = envelope
        .band
        .chunks(width)
        .rev()
        .flatten()
        .map(|&v| f64::from(v))
        .collect();
    let grid = InterpolationGrid::from_values(region, envelope.transform[1], width, height, values)
        .map_err(|e| incompatible(e.to_string()))?;

    debug!(width, height, "raster read");
    Ok(Raster {
        grid,
        transform: envelope.transform,
        format_version: envelope.format_version,
    })
}
