//! Typed survey and observatory records and the ordered series that hold them.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A row that carries an acquisition timestamp.
pub trait Timestamped {
    /// Return the acquisition time of this row.
    fn datetime(&self) -> NaiveDateTime;
}

/// A row that carries a magnetic field reading usable as a processing signal.
pub trait Reading: Timestamped {
    /// Return the total magnetic field value (nT).
    fn magnetic_field(&self) -> f64;
}

/// Projected map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projected {
    /// Easting in projection units (usually metres).
    pub easting: f64,
    /// Northing in projection units.
    pub northing: f64,
}

/// Geographic coordinates in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geographic {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// One survey reading.
///
/// Optional columns of the survey table are `Option`s. The diurnal stage
/// fills `magnetic_field_corrected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    /// Acquisition time.
    pub datetime: NaiveDateTime,
    /// Raw total field (nT).
    pub magnetic_field: f64,
    /// Projected position, when the survey provides `Easting`/`Northing`.
    pub projected: Option<Projected>,
    /// Geographic position, when the survey provides `Latitude`/`Longitude`.
    pub geographic: Option<Geographic>,
    /// Sensor depth.
    pub depth: Option<f64>,
    /// Sensor altitude.
    pub altitude: Option<f64>,
    /// Diurnally corrected field, once computed.
    pub magnetic_field_corrected: Option<f64>,
}

impl SurveyRecord {
    /// Create a record with only the required columns.
    #[must_use]
    pub fn new(datetime: NaiveDateTime, magnetic_field: f64) -> Self {
        Self {
            datetime,
            magnetic_field,
            projected: None,
            geographic: None,
            depth: None,
            altitude: None,
            magnetic_field_corrected: None,
        }
    }

    /// Attach projected coordinates.
    #[must_use]
    pub fn with_projected(mut self, easting: f64, northing: f64) -> Self {
        self.projected = Some(Projected { easting, northing });
        self
    }

    /// Attach geographic coordinates.
    #[must_use]
    pub fn with_geographic(mut self, latitude: f64, longitude: f64) -> Self {
        self.geographic = Some(Geographic { latitude, longitude });
        self
    }

    /// Attach a sensor depth.
    #[must_use]
    pub fn with_depth(mut self, depth: f64) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Attach a sensor altitude.
    #[must_use]
    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }
}

impl Timestamped for SurveyRecord {
    fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }
}

impl Reading for SurveyRecord {
    fn magnetic_field(&self) -> f64 {
        self.magnetic_field
    }
}

/// One observatory (base station) reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservatoryRecord {
    /// Acquisition time.
    pub datetime: NaiveDateTime,
    /// Total field (nT).
    pub magnetic_field: f64,
}

impl ObservatoryRecord {
    /// Create a record from a total field value.
    #[must_use]
    pub fn new(datetime: NaiveDateTime, magnetic_field: f64) -> Self {
        Self { datetime, magnetic_field }
    }

    /// Create a record from the three directional components,
    /// with total field `sqrt(bx² + by² + bz²)`.
    #[must_use]
    pub fn from_components(datetime: NaiveDateTime, bx: f64, by: f64, bz: f64) -> Self {
        Self {
            datetime,
            magnetic_field: (bx * bx + by * by + bz * bz).sqrt(),
        }
    }
}

impl Timestamped for ObservatoryRecord {
    fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }
}

impl Reading for ObservatoryRecord {
    fn magnetic_field(&self) -> f64 {
        self.magnetic_field
    }
}

/// An ordered sequence of timestamped rows.
///
/// Row order is the order of construction; stages that need time order sort
/// explicitly and return a new series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series<R> {
    records: Vec<R>,
}

/// A series of survey readings.
pub type SurveySeries = Series<SurveyRecord>;

/// A series of observatory readings.
pub type ObservatorySeries = Series<ObservatoryRecord>;

impl<R: Timestamped> Series<R> {
    /// Wrap rows in a series, preserving their order.
    #[must_use]
    pub fn new(records: Vec<R>) -> Self {
        Self { records }
    }

    /// Return the rows.
    #[must_use]
    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Consume the series and return its rows.
    #[must_use]
    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    /// Return the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Return true if the series has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Return the earliest and latest timestamps, or `None` when empty.
    ///
    /// Does not assume the rows are sorted.
    #[must_use]
    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let mut iter = self.records.iter().map(Timestamped::datetime);
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }

    /// Return true if the rows are in non-decreasing time order.
    #[must_use]
    pub fn is_time_sorted(&self) -> bool {
        self.records
            .windows(2)
            .all(|w| w[0].datetime() <= w[1].datetime())
    }
}

impl<R: Timestamped + Clone> Series<R> {
    /// Return a copy stable-sorted by timestamp.
    #[must_use = "returns a new sorted series; the original is unchanged"]
    pub fn sorted_by_time(&self) -> Self {
        let mut records = self.records.clone();
        records.sort_by_key(Timestamped::datetime);
        Self { records }
    }

    /// Return a copy without repeated timestamps, keeping the first occurrence
    /// in the current row order.
    #[must_use = "returns a new deduplicated series; the original is unchanged"]
    pub fn dedup_by_time(&self) -> Self {
        let mut seen = HashSet::with_capacity(self.records.len());
        let records = self
            .records
            .iter()
            .filter(|r| seen.insert(r.datetime()))
            .cloned()
            .collect();
        Self { records }
    }

    /// Return a copy restricted to rows with `start <= t <= end`.
    #[must_use = "returns a new filtered series; the original is unchanged"]
    pub fn within(&self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let records = self
            .records
            .iter()
            .filter(|r| {
                let t = r.datetime();
                t >= start && t <= end
            })
            .cloned()
            .collect();
        Self { records }
    }
}

impl<R> FromIterator<R> for Series<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
