//! Survey, observatory and scattered-point table readers with input validation.
//!
//! Tables are comma-separated, except `.txt` and `.tsv` files which are
//! tab-separated. Header names are matched case-insensitively after trimming,
//! and unknown columns are ignored.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use magsurvey_grid::ScatteredPoint;
use magsurvey_series::{
    ObservatoryRecord, ObservatorySeries, Projected, SurveyRecord, SurveySeries,
};
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::datetime::parse_datetime;

/// Column holding the timestamp.
pub const DATETIME_COLUMN: &str = "Datetime";
/// Column holding the total magnetic field.
pub const MAGNETIC_FIELD_COLUMN: &str = "Magnetic_Field";
/// Column holding the diurnally corrected field.
pub const CORRECTED_COLUMN: &str = "Magnetic_Field_Corrected";
/// Column holding the projected easting.
pub const EASTING_COLUMN: &str = "Easting";
/// Column holding the projected northing.
pub const NORTHING_COLUMN: &str = "Northing";

fn delimiter_for(path: &Path) -> u8 {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("txt" | "tsv") => b'\t',
        _ => b',',
    }
}

fn key(name: &str) -> String {
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn csv_error(path: &Path, e: csv::Error) -> IoError {
    IoError::CsvParse {
        path: path.to_path_buf(),
        offset: e.position().map_or(0, |p| p.byte()),
        source: e,
    }
}

/// An open table: its rows plus a case-insensitive header lookup.
struct Table {
    path: PathBuf,
    reader: csv::Reader<File>,
    columns: HashMap<String, usize>,
}

impl Table {
    fn open(path: &Path) -> Result<Self, IoError> {
        let file = File::open(path).map_err(|e| IoError::FileNotFound {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter_for(path))
            .trim(csv::Trim::All)
            .from_reader(file);
        let header = reader.headers().map_err(|e| csv_error(path, e))?;
        let mut columns = HashMap::with_capacity(header.len());
        for (i, name) in header.iter().enumerate() {
            // first occurrence wins on repeated names
            columns.entry(key(name)).or_insert(i);
        }
        debug!(n_columns = columns.len(), "read table header");
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            columns,
        })
    }

    fn find(&self, name: &str) -> Option<Column> {
        self.columns.get(&key(name)).map(|&index| Column { name: name.to_string(), index })
    }

    fn missing(&self, name: &str) -> IoError {
        IoError::MissingColumn {
            path: self.path.clone(),
            column: name.to_string(),
        }
    }

    fn require(&self, name: &str) -> Result<Column, IoError> {
        self.find(name).ok_or_else(|| self.missing(name))
    }

    /// Both columns of a pair, or neither.
    fn pair(&self, a: &str, b: &str) -> Result<Option<(Column, Column)>, IoError> {
        match (self.find(a), self.find(b)) {
            (Some(ca), Some(cb)) => Ok(Some((ca, cb))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(self.missing(b)),
            (None, Some(_)) => Err(self.missing(a)),
        }
    }

    /// Visit each data row with its zero-based index.
    fn for_each_row(
        &mut self,
        mut visit: impl FnMut(&Path, usize, &csv::StringRecord) -> Result<(), IoError>,
    ) -> Result<usize, IoError> {
        let mut record = csv::StringRecord::new();
        let mut n_rows = 0;
        loop {
            let more = self
                .reader
                .read_record(&mut record)
                .map_err(|e| csv_error(&self.path, e))?;
            if !more {
                break;
            }
            visit(&self.path, n_rows, &record)?;
            n_rows += 1;
        }
        if n_rows == 0 {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }
        Ok(n_rows)
    }
}

struct Column {
    name: String,
    index: usize,
}

impl Column {
    fn raw<'r>(&self, record: &'r csv::StringRecord) -> &'r str {
        record.get(self.index).unwrap_or("")
    }

    fn datetime(
        &self,
        path: &Path,
        row_index: usize,
        record: &csv::StringRecord,
    ) -> Result<chrono::NaiveDateTime, IoError> {
        let raw = self.raw(record);
        parse_datetime(raw).ok_or_else(|| IoError::BadDatetime {
            path: path.to_path_buf(),
            row_index,
            raw: raw.to_string(),
        })
    }

    fn value(&self, path: &Path, row_index: usize, record: &csv::StringRecord) -> Result<f64, IoError> {
        self.optional(path, row_index, record)?
            .ok_or_else(|| self.non_finite(path, row_index, ""))
    }

    /// Like [`Column::value`], but an empty cell reads as `NaN` so the row
    /// can be dropped or filled later.
    fn value_or_nan(
        &self,
        path: &Path,
        row_index: usize,
        record: &csv::StringRecord,
    ) -> Result<f64, IoError> {
        Ok(self.optional(path, row_index, record)?.unwrap_or(f64::NAN))
    }

    /// Empty cells are `None`; anything else must be a finite float.
    fn optional(
        &self,
        path: &Path,
        row_index: usize,
        record: &csv::StringRecord,
    ) -> Result<Option<f64>, IoError> {
        let raw = self.raw(record);
        if raw.is_empty() {
            return Ok(None);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(self.non_finite(path, row_index, raw)),
        }
    }

    fn non_finite(&self, path: &Path, row_index: usize, raw: &str) -> IoError {
        IoError::NonFiniteValue {
            path: path.to_path_buf(),
            row_index,
            column: self.name.clone(),
            raw: raw.to_string(),
        }
    }
}

/// Reads a survey table into a [`SurveySeries`].
///
/// Required columns: `Datetime`, `Magnetic_Field`. Optional columns:
/// `Easting`/`Northing`, `Latitude`/`Longitude` (each pair all or nothing),
/// `Depth`, `Altitude`, `Magnetic_Field_Corrected`. Empty optional cells
/// read as absent and an empty `Magnetic_Field` cell reads as `NaN`. Row
/// order is preserved.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed record or inconsistent row length |
/// | [`IoError::MissingColumn`] | A required column, or half of a pair, is absent |
/// | [`IoError::BadDatetime`] | Timestamp matches no accepted format |
/// | [`IoError::NonFiniteValue`] | Numeric cell is NaN, Inf, or unparseable |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
pub struct SurveyReader {
    path: PathBuf,
}

impl SurveyReader {
    /// Create a new reader for the given table path.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Read and validate the table.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<SurveySeries, IoError> {
        let mut table = Table::open(&self.path)?;
        let datetime = table.require(DATETIME_COLUMN)?;
        let field = table.require(MAGNETIC_FIELD_COLUMN)?;
        let projected = table.pair(EASTING_COLUMN, NORTHING_COLUMN)?;
        let geographic = table.pair("Latitude", "Longitude")?;
        let depth = table.find("Depth");
        let altitude = table.find("Altitude");
        let corrected = table.find(CORRECTED_COLUMN);

        let mut records = Vec::new();
        table.for_each_row(|path, row, record| {
            let mut r = SurveyRecord::new(
                datetime.datetime(path, row, record)?,
                field.value_or_nan(path, row, record)?,
            );
            if let Some((e, n)) = &projected
                && let (Some(easting), Some(northing)) =
                    (e.optional(path, row, record)?, n.optional(path, row, record)?)
            {
                r = r.with_projected(easting, northing);
            }
            if let Some((lat, lon)) = &geographic
                && let (Some(latitude), Some(longitude)) =
                    (lat.optional(path, row, record)?, lon.optional(path, row, record)?)
            {
                r = r.with_geographic(latitude, longitude);
            }
            if let Some(c) = &depth {
                r.depth = c.optional(path, row, record)?;
            }
            if let Some(c) = &altitude {
                r.altitude = c.optional(path, row, record)?;
            }
            if let Some(c) = &corrected {
                r.magnetic_field_corrected = c.optional(path, row, record)?;
            }
            records.push(r);
            Ok(())
        })?;

        info!(
            n_rows = records.len(),
            projected = projected.is_some(),
            corrected = corrected.is_some(),
            "survey loaded"
        );
        Ok(SurveySeries::new(records))
    }
}

/// Reads one or more observatory tables into a single [`ObservatorySeries`].
///
/// Each table needs `Datetime` and either `Magnetic_Field` or the three
/// directional components `bx`, `by`, `bz`, whose Euclidean norm becomes the
/// total field. Tables are concatenated in the order given and the result is
/// stably sorted by time; duplicate timestamps are kept.
///
/// # Errors
///
/// As [`SurveyReader`]. An empty path list is [`IoError::EmptyDataset`].
pub struct ObservatoryReader {
    paths: Vec<PathBuf>,
}

impl ObservatoryReader {
    /// Create a reader over the given table paths.
    pub fn new<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self {
            paths: paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
        }
    }

    /// Read, merge and sort every table.
    #[instrument(skip(self), fields(n_files = self.paths.len()))]
    pub fn read(&self) -> Result<ObservatorySeries, IoError> {
        let Some(first) = self.paths.first() else {
            return Err(IoError::EmptyDataset {
                path: PathBuf::new(),
            });
        };
        let mut records = Vec::new();
        for path in &self.paths {
            let before = records.len();
            read_observatory(path, &mut records)?;
            debug!(path = %path.display(), n_rows = records.len() - before, "observatory file read");
        }
        records.sort_by_key(|r: &ObservatoryRecord| r.datetime);

        info!(
            n_rows = records.len(),
            first = %first.display(),
            "observatory loaded"
        );
        Ok(ObservatorySeries::new(records))
    }
}

enum FieldSource {
    Total(Column),
    Components([Column; 3]),
}

fn read_observatory(path: &Path, out: &mut Vec<ObservatoryRecord>) -> Result<(), IoError> {
    let mut table = Table::open(path)?;
    let datetime = table.require(DATETIME_COLUMN)?;
    let source = match table.find(MAGNETIC_FIELD_COLUMN) {
        Some(field) => FieldSource::Total(field),
        None => FieldSource::Components([
            table.require("bx")?,
            table.require("by")?,
            table.require("bz")?,
        ]),
    };

    table.for_each_row(|path, row, record| {
        let t = datetime.datetime(path, row, record)?;
        let r = match &source {
            FieldSource::Total(field) => ObservatoryRecord::new(t, field.value(path, row, record)?),
            FieldSource::Components([bx, by, bz]) => ObservatoryRecord::from_components(
                t,
                bx.value(path, row, record)?,
                by.value(path, row, record)?,
                bz.value(path, row, record)?,
            ),
        };
        out.push(r);
        Ok(())
    })?;
    Ok(())
}

/// Reads scattered `(Easting, Northing, value)` points from any table with
/// projected coordinates, such as a residual table written by
/// [`TableWriter`](crate::TableWriter).
///
/// Rows with an empty value or coordinate cell are skipped.
pub struct PointReader {
    path: PathBuf,
    value_column: String,
}

impl PointReader {
    /// Create a reader taking values from `value_column`.
    pub fn new(path: &Path, value_column: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            value_column: value_column.to_string(),
        }
    }

    /// Read the points.
    ///
    /// # Errors
    ///
    /// As [`SurveyReader`], with `Easting`, `Northing` and the value column
    /// required.
    #[instrument(skip(self), fields(path = %self.path.display(), column = %self.value_column))]
    pub fn read(&self) -> Result<Vec<ScatteredPoint>, IoError> {
        let mut table = Table::open(&self.path)?;
        let easting = table.require(EASTING_COLUMN)?;
        let northing = table.require(NORTHING_COLUMN)?;
        let value = table.require(&self.value_column)?;

        let mut points = Vec::new();
        let n_rows = table.for_each_row(|path, row, record| {
            if let (Some(e), Some(n), Some(v)) = (
                easting.optional(path, row, record)?,
                northing.optional(path, row, record)?,
                value.optional(path, row, record)?,
            ) {
                points.push(ScatteredPoint::new(e, n, v));
            }
            Ok(())
        })?;

        info!(n_rows, n_points = points.len(), "points loaded");
        Ok(points)
    }
}

/// Collect the survey rows that carry projected coordinates as scattered
/// points, taking each value from `value`.
#[must_use]
pub fn survey_points(series: &SurveySeries, value: impl Fn(&SurveyRecord) -> f64) -> Vec<ScatteredPoint> {
    series
        .records()
        .iter()
        .filter_map(|r| {
            r.projected
                .map(|Projected { easting, northing }| ScatteredPoint::new(easting, northing, value(r)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn write_table(content: &str, suffix: &str) -> NamedTempFile {
        let mut f = Builder::new().suffix(suffix).tempfile().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn read_survey_with_all_columns() {
        let csv = "Datetime,Magnetic_Field,Easting,Northing,Latitude,Longitude,Depth,Altitude\n\
                   2023-06-01 09:00:00,50001.5,500000,6200000,55.9,-3.2,12.5,\n\
                   2023-06-01 09:00:01,50002.5,500002,6200001,55.9,-3.2,12.6,3.0\n";
        let f = write_table(csv, ".csv");
        let s = SurveyReader::new(f.path()).read().unwrap();
        assert_eq!(s.len(), 2);
        let r = &s.records()[0];
        assert_eq!(r.magnetic_field, 50001.5);
        assert_eq!(r.projected, Some(Projected { easting: 500000.0, northing: 6200000.0 }));
        assert!(r.geographic.is_some());
        assert_eq!(r.depth, Some(12.5));
        assert_eq!(r.altitude, None);
        assert_eq!(s.records()[1].altitude, Some(3.0));
    }

    #[test]
    fn headers_are_case_insensitive_and_trimmed() {
        let csv = " datetime ,MAGNETIC_FIELD,extra\n2023-06-01T09:00:00,1.0,x\n";
        let f = write_table(csv, ".csv");
        let s = SurveyReader::new(f.path()).read().unwrap();
        assert_eq!(s.len(), 1);
        assert!(s.records()[0].projected.is_none());
    }

    #[test]
    fn tab_separated_txt() {
        let tsv = "Datetime\tMagnetic_Field\n2023-06-01 09:00:00\t7.5\n";
        let f = write_table(tsv, ".txt");
        let s = SurveyReader::new(f.path()).read().unwrap();
        assert_eq!(s.records()[0].magnetic_field, 7.5);
    }

    #[test]
    fn error_missing_required_column() {
        let f = write_table("Datetime,Field\n2023-06-01 09:00:00,1.0\n", ".csv");
        let result = SurveyReader::new(f.path()).read();
        assert!(matches!(result, Err(IoError::MissingColumn { column, .. }) if column == "Magnetic_Field"));
    }

    #[test]
    fn error_half_coordinate_pair() {
        let f = write_table("Datetime,Magnetic_Field,Easting\n2023-06-01 09:00:00,1.0,5\n", ".csv");
        let result = SurveyReader::new(f.path()).read();
        assert!(matches!(result, Err(IoError::MissingColumn { column, .. }) if column == "Northing"));
    }

    #[test]
    fn error_bad_datetime() {
        let f = write_table("Datetime,Magnetic_Field\n2023-06-01 09:00:00,1.0\nnoon,2.0\n", ".csv");
        let result = SurveyReader::new(f.path()).read();
        assert!(matches!(result, Err(IoError::BadDatetime { row_index: 1, .. })));
    }

    #[test]
    fn error_non_finite_field() {
        for bad in ["NaN", "inf", "abc"] {
            let csv = format!("Datetime,Magnetic_Field\n2023-06-01 09:00:00,{bad}\n");
            let f = write_table(&csv, ".csv");
            let result = SurveyReader::new(f.path()).read();
            assert!(matches!(result, Err(IoError::NonFiniteValue { .. })), "{bad}");
        }
    }

    #[test]
    fn blank_survey_field_reads_as_nan() {
        let csv = "Datetime,Magnetic_Field,Easting,Northing\n\
                   2023-06-01 09:00:00,50001.5,10,20\n\
                   2023-06-01 09:00:01,,11,21\n\
                   2023-06-01 09:00:02,50003.5,12,22\n";
        let f = write_table(csv, ".csv");
        let s = SurveyReader::new(f.path()).read().unwrap();
        assert_eq!(s.len(), 3);
        assert!(s.records()[1].magnetic_field.is_nan());
        assert_eq!(s.records()[2].magnetic_field, 50003.5);
    }

    #[test]
    fn error_empty_and_missing_file() {
        let f = write_table("Datetime,Magnetic_Field\n", ".csv");
        assert!(matches!(
            SurveyReader::new(f.path()).read(),
            Err(IoError::EmptyDataset { .. })
        ));
        assert!(matches!(
            SurveyReader::new(Path::new("/nonexistent/survey.csv")).read(),
            Err(IoError::FileNotFound { .. })
        ));
    }

    #[test]
    fn error_inconsistent_row_length() {
        let f = write_table("Datetime,Magnetic_Field\n2023-06-01 09:00:00,1.0,9\n", ".csv");
        assert!(matches!(
            SurveyReader::new(f.path()).read(),
            Err(IoError::CsvParse { .. })
        ));
    }

    #[test]
    fn observatory_from_components() {
        let csv = "Datetime,bx,by,bz\n2023-06-01 09:00:00,3,4,12\n";
        let f = write_table(csv, ".csv");
        let s = ObservatoryReader::new([f.path()]).read().unwrap();
        assert!((s.records()[0].magnetic_field - 13.0).abs() < 1e-12);
    }

    #[test]
    fn observatory_without_field_or_components() {
        let f = write_table("Datetime,bx,by\n2023-06-01 09:00:00,3,4\n", ".csv");
        let result = ObservatoryReader::new([f.path()]).read();
        assert!(matches!(result, Err(IoError::MissingColumn { column, .. }) if column == "bz"));
    }

    #[test]
    fn observatory_files_are_merged_and_sorted() {
        let late = write_table("Datetime,Magnetic_Field\n2023-06-01 09:00:02,3\n2023-06-01 09:00:03,4\n", ".csv");
        let early = write_table("Datetime,Magnetic_Field\n2023-06-01 09:00:00,1\n2023-06-01 09:00:02,2\n", ".csv");
        let s = ObservatoryReader::new([late.path(), early.path()]).read().unwrap();
        let values: Vec<f64> = s.records().iter().map(|r| r.magnetic_field).collect();
        // the 09:00:02 tie keeps file order
        assert_eq!(values, vec![1.0, 3.0, 2.0, 4.0]);
        assert!(matches!(
            ObservatoryReader::new(Vec::<PathBuf>::new()).read(),
            Err(IoError::EmptyDataset { .. })
        ));
    }

    #[test]
    fn points_skip_empty_values() {
        let csv = "Easting,Northing,Baseline\n0,0,1.5\n1,0,\n0,1,-2\n";
        let f = write_table(csv, ".csv");
        let points = PointReader::new(f.path(), "baseline").read().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1], ScatteredPoint::new(0.0, 1.0, -2.0));
    }

    #[test]
    fn survey_points_need_coordinates() {
        let t = parse_datetime("2023-06-01 09:00:00").unwrap();
        let s = SurveySeries::new(vec![
            SurveyRecord::new(t, 1.0).with_projected(10.0, 20.0),
            SurveyRecord::new(t, 2.0),
        ]);
        let points = survey_points(&s, |r| r.magnetic_field);
        assert_eq!(points, vec![ScatteredPoint::new(10.0, 20.0, 1.0)]);
    }
}
