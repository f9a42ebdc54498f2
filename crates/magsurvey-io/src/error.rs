//! I/O error types for magsurvey-io.

use std::path::PathBuf;

/// Errors from reading survey tables, writing results, and raster export.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Returned when the input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the CSV parser encounters a malformed record.
    #[error("CSV parse error in {path} at byte offset {offset}")]
    CsvParse {
        /// Path to the table.
        path: PathBuf,
        /// Byte offset where the error occurred.
        offset: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when a required column is absent from the header.
    #[error("missing column \"{column}\" in {path}")]
    MissingColumn {
        /// Path to the table.
        path: PathBuf,
        /// Expected column name.
        column: String,
    },

    /// Returned when a datetime cell matches none of the accepted formats.
    #[error("unrecognised datetime in {path}: row {row_index}, raw value \"{raw}\"")]
    BadDatetime {
        /// Path to the table.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// The raw cell text.
        raw: String,
    },

    /// Returned when a numeric cell is NaN, Inf, or otherwise not a finite float.
    #[error("non-finite value in {path}: row {row_index}, column \"{column}\", raw value \"{raw}\"")]
    NonFiniteValue {
        /// Path to the table.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Column name.
        column: String,
        /// The raw cell text.
        raw: String,
    },

    /// Returned when a table contains a header but zero data rows.
    #[error("empty dataset (no data rows) in {path}")]
    EmptyDataset {
        /// Path to the table.
        path: PathBuf,
    },

    /// Returned when the output directory cannot be created.
    #[error("cannot create output directory {path}")]
    OutputDirCreate {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when an output file cannot be written.
    #[error("cannot write file {path}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a CSV output row cannot be serialized.
    #[error("cannot encode table {path}")]
    TableEncode {
        /// Path being written.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when a raster envelope cannot be encoded.
    #[error("cannot encode raster {path}")]
    RasterEncode {
        /// Path being written.
        path: PathBuf,
        /// Underlying bincode error.
        source: bincode::Error,
    },

    /// Returned when a raster file cannot be decoded.
    #[error("cannot decode raster {path}")]
    RasterDecode {
        /// Path being read.
        path: PathBuf,
        /// Underlying bincode error.
        source: bincode::Error,
    },

    /// Returned when a raster was written by an incompatible format version,
    /// or its header does not describe a valid grid.
    #[error("incompatible raster {path}: {reason}")]
    IncompatibleRaster {
        /// Path being read.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Returned when an output name contains characters outside `[a-zA-Z0-9_-]`.
    #[error("invalid output name \"{name}\": must match [a-zA-Z0-9_-]+")]
    InvalidOutputName {
        /// The invalid name.
        name: String,
    },

    /// Returned when a dataset state change is not allowed.
    #[error("invalid dataset state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Returned when a dataset type name is not recognised.
    #[error("unknown dataset type \"{name}\"")]
    UnknownDatasetType {
        /// The rejected name.
        name: String,
    },

    /// Returned when a dataset state name is not recognised.
    #[error("unknown dataset state \"{name}\"")]
    UnknownDatasetState {
        /// The rejected name.
        name: String,
    },
}
