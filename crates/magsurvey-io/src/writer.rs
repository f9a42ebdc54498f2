//! CSV and JSON result writers.
//!
//! Every file is written to a `*.partial` sibling first and renamed into place
//! once complete, so a failed write never leaves a truncated result behind.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use magsurvey_series::{ResidualSeries, SurveyRecord, SurveySeries};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::OutputName;

/// Layout used for timestamps in written tables.
pub const DATETIME_WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A fully written `*.partial` file waiting to be renamed onto its target.
///
/// Dropping an uncommitted file deletes it.
pub(crate) struct Staged {
    partial: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl Staged {
    /// Rename the partial file onto its target.
    pub(crate) fn commit(mut self) -> Result<PathBuf, IoError> {
        fs::rename(&self.partial, &self.target).map_err(|e| IoError::WriteFile {
            path: self.target.clone(),
            source: e,
        })?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.committed && fs::remove_file(&self.partial).is_ok() {
            debug!(path = %self.partial.display(), "removed partial file");
        }
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map_or_else(OsString::new, OsString::from);
    name.push(".partial");
    target.with_file_name(name)
}

/// Write `target`'s content to its partial path with `fill`.
pub(crate) fn stage(
    target: &Path,
    fill: impl FnOnce(&mut BufWriter<File>) -> Result<(), IoError>,
) -> Result<Staged, IoError> {
    let partial = partial_path(target);
    let file = File::create(&partial).map_err(|e| IoError::WriteFile {
        path: partial.clone(),
        source: e,
    })?;
    // from here on the guard removes the partial file on any early return
    let staged = Staged {
        partial,
        target: target.to_path_buf(),
        committed: false,
    };
    let mut out = BufWriter::new(file);
    fill(&mut out)?;
    out.flush().map_err(|e| IoError::WriteFile {
        path: staged.partial.clone(),
        source: e,
    })?;
    Ok(staged)
}

/// Stage a CSV table with one row per item of `rows`.
pub(crate) fn stage_csv<R: Serialize>(
    target: &Path,
    rows: impl IntoIterator<Item = R>,
) -> Result<Staged, IoError> {
    stage(target, |out| {
        let encode = |e: csv::Error| IoError::TableEncode {
            path: target.to_path_buf(),
            source: e,
        };
        let mut wtr = csv::Writer::from_writer(out);
        for row in rows {
            wtr.serialize(row).map_err(&encode)?;
        }
        wtr.flush().map_err(|e| IoError::WriteFile {
            path: target.to_path_buf(),
            source: e,
        })
    })
}

/// Create `dir` and any missing parents.
pub(crate) fn ensure_dir(dir: &Path) -> Result<(), IoError> {
    fs::create_dir_all(dir).map_err(|e| IoError::OutputDirCreate {
        path: dir.to_path_buf(),
        source: e,
    })
}

// --- Row structs for CSV serialization ---

#[derive(Serialize)]
struct SurveyRow {
    #[serde(rename = "Datetime")]
    datetime: String,
    #[serde(rename = "Magnetic_Field")]
    magnetic_field: f64,
    #[serde(rename = "Easting")]
    easting: Option<f64>,
    #[serde(rename = "Northing")]
    northing: Option<f64>,
    #[serde(rename = "Latitude")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    longitude: Option<f64>,
    #[serde(rename = "Depth")]
    depth: Option<f64>,
    #[serde(rename = "Altitude")]
    altitude: Option<f64>,
    #[serde(rename = "Magnetic_Field_Corrected")]
    magnetic_field_corrected: Option<f64>,
}

impl From<&SurveyRecord> for SurveyRow {
    fn from(r: &SurveyRecord) -> Self {
        Self {
            datetime: r.datetime.format(DATETIME_WRITE_FORMAT).to_string(),
            magnetic_field: r.magnetic_field,
            easting: r.projected.map(|p| p.easting),
            northing: r.projected.map(|p| p.northing),
            latitude: r.geographic.map(|g| g.latitude),
            longitude: r.geographic.map(|g| g.longitude),
            depth: r.depth,
            altitude: r.altitude,
            magnetic_field_corrected: r.magnetic_field_corrected,
        }
    }
}

// csv cannot serialize flattened structs, so the survey columns are repeated
#[derive(Serialize)]
struct ResidualRow {
    #[serde(rename = "Datetime")]
    datetime: String,
    #[serde(rename = "Magnetic_Field")]
    magnetic_field: f64,
    #[serde(rename = "Easting")]
    easting: Option<f64>,
    #[serde(rename = "Northing")]
    northing: Option<f64>,
    #[serde(rename = "Latitude")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    longitude: Option<f64>,
    #[serde(rename = "Depth")]
    depth: Option<f64>,
    #[serde(rename = "Altitude")]
    altitude: Option<f64>,
    #[serde(rename = "Magnetic_Field_Corrected")]
    magnetic_field_corrected: Option<f64>,
    #[serde(rename = "Magnetic_Field_Smoothed")]
    smoothed: f64,
    #[serde(rename = "Magnetic_Field_Ambient")]
    ambient: f64,
    #[serde(rename = "Baseline")]
    baseline: f64,
    id: String,
}

/// Writes stage outputs as CSV tables and run summaries as JSON.
///
/// Creates the output directory on construction if it does not exist.
/// Output files are named `{name}_corrected.csv`, `{name}_residuals.csv`
/// and `{name}_summary.json`. Grid cells are written by
/// [`RasterWriter`](crate::RasterWriter).
pub struct TableWriter {
    output_dir: PathBuf,
    name: OutputName,
}

impl TableWriter {
    /// Create a new writer targeting the given directory and output name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), name = %name))]
    pub fn new(output_dir: &Path, name: OutputName) -> Result<Self, IoError> {
        ensure_dir(output_dir)?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            name,
        })
    }

    /// Return the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Return the output name.
    #[must_use]
    pub fn name(&self) -> &OutputName {
        &self.name
    }

    fn path(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{suffix}", self.name.as_str()))
    }

    /// Write a diurnally corrected survey to `{name}_corrected.csv`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] or [`IoError::TableEncode`] if the file
    /// cannot be written.
    #[instrument(skip_all)]
    pub fn write_corrected(&self, series: &SurveySeries) -> Result<PathBuf, IoError> {
        let path = self.path("corrected.csv");
        let path = stage_csv(&path, series.records().iter().map(SurveyRow::from))?.commit()?;
        info!(path = %path.display(), n_rows = series.len(), "corrected survey written");
        Ok(path)
    }

    /// Write residuals to `{name}_residuals.csv`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] or [`IoError::TableEncode`] if the file
    /// cannot be written.
    #[instrument(skip_all)]
    pub fn write_residuals(&self, series: &ResidualSeries) -> Result<PathBuf, IoError> {
        let path = self.path("residuals.csv");
        let rows = series.records().iter().map(|r| {
            let s = SurveyRow::from(&r.record);
            ResidualRow {
                datetime: s.datetime,
                magnetic_field: s.magnetic_field,
                easting: s.easting,
                northing: s.northing,
                latitude: s.latitude,
                longitude: s.longitude,
                depth: s.depth,
                altitude: s.altitude,
                magnetic_field_corrected: s.magnetic_field_corrected,
                smoothed: r.magnetic_field_smoothed,
                ambient: r.magnetic_field_ambient,
                baseline: r.baseline,
                id: r.id.to_string(),
            }
        });
        let path = stage_csv(&path, rows)?.commit()?;
        info!(path = %path.display(), n_rows = series.len(), "residuals written");
        Ok(path)
    }

    /// Write a run summary to `{name}_summary.json`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] if the file cannot be written.
    #[instrument(skip_all)]
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf, IoError> {
        let path = self.path("summary.json");
        let staged = stage(&path, |out| {
            serde_json::to_writer_pretty(out, summary).map_err(|e| IoError::WriteFile {
                path: path.clone(),
                source: e.into(),
            })
        })?;
        let path = staged.commit()?;
        info!(path = %path.display(), "summary written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{PointReader, SurveyReader};
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use magsurvey_series::ResidualConfig;
    use tempfile::TempDir;

    fn t(sec: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + TimeDelta::seconds(sec)
    }

    fn survey() -> SurveySeries {
        (0..20)
            .map(|i| {
                let mut r = SurveyRecord::new(t(i), 50_000.0 + i as f64)
                    .with_projected(i as f64 * 10.0, 5.0);
                r.magnetic_field_corrected = Some(49_990.0 + i as f64);
                r
            })
            .collect()
    }

    fn writer(dir: &TempDir) -> TableWriter {
        TableWriter::new(dir.path(), OutputName::new("line_7").unwrap()).unwrap()
    }

    #[test]
    fn corrected_table_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = writer(&dir).write_corrected(&survey()).unwrap();
        assert_eq!(path, dir.path().join("line_7_corrected.csv"));

        let back = SurveyReader::new(&path).read().unwrap();
        assert_eq!(back, survey());
    }

    #[test]
    fn residual_table_has_added_columns() {
        let dir = TempDir::new().unwrap();
        let residuals = ResidualConfig::new(3, 5).unwrap().extract(&survey()).unwrap();
        let path = writer(&dir).write_residuals(&residuals).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = rdr.headers().unwrap().iter().map(String::from).collect();
        for column in ["Datetime", "Easting", "Magnetic_Field_Smoothed", "Magnetic_Field_Ambient", "Baseline", "id"] {
            assert!(header.iter().any(|h| h == column), "missing {column}");
        }
        assert_eq!(rdr.records().count(), residuals.len());

        let points = PointReader::new(&path, "Baseline").read().unwrap();
        assert_eq!(points.len(), residuals.len());
        assert_eq!(points[4].value, residuals.records()[4].baseline);
    }

    #[test]
    fn summary_is_pretty_json() {
        let dir = TempDir::new().unwrap();
        let path = writer(&dir)
            .write_summary(&serde_json::json!({ "stage": "interpolate", "n_cells": 1 }))
            .unwrap();
        assert_eq!(path, dir.path().join("line_7_summary.json"));
        let content: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(content["n_cells"], 1);
    }

    #[test]
    fn creates_nested_output_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let w = TableWriter::new(&nested, OutputName::new("x").unwrap()).unwrap();
        w.write_corrected(&survey()).unwrap();
        assert!(nested.join("x_corrected.csv").exists());
    }

    #[test]
    fn failed_fill_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("broken.csv");
        let result = stage(&target, |_| {
            Err(IoError::InvalidOutputName { name: "boom".into() })
        });
        assert!(result.is_err());
        assert!(!partial_path(&target).exists());
        assert!(!target.exists());
    }

    #[test]
    fn uncommitted_stage_is_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("dropped.csv");
        let staged = stage_csv(&target, [1, 2, 3]).unwrap();
        assert!(partial_path(&target).exists());
        drop(staged);
        assert!(!partial_path(&target).exists());
        assert_eq!(partial_path(&target).file_name().unwrap(), "dropped.csv.partial");
    }
}
