//! File I/O, validation, and serialization for the magsurvey pipeline.

mod datetime;
mod domain;
mod error;
mod raster;
mod reader;
mod writer;

pub use datetime::{DATETIME_FORMATS, OBSERVATION_DATE_FORMAT, observation_dates, parse_datetime};
pub use domain::{Dataset, DatasetId, DatasetState, DatasetType, OBSERVATION_DATES_TAG, OutputName};
pub use error::IoError;
pub use raster::{
    FORMAT_VERSION, RASTER_MAGIC, Raster, RasterArtifacts, RasterEnvelope, RasterWriter,
    affine_transform, read_raster, world_file,
};
pub use reader::{
    CORRECTED_COLUMN, DATETIME_COLUMN, EASTING_COLUMN, MAGNETIC_FIELD_COLUMN, NORTHING_COLUMN,
    ObservatoryReader, PointReader, SurveyReader, survey_points,
};
pub use writer::{DATETIME_WRITE_FORMAT, TableWriter};
