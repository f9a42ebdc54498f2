//! Domain types for magsurvey-io: datasets, their lifecycle, and output names.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::IoError;

/// Tag holding the `start - end` date range of a dataset's readings.
pub const OBSERVATION_DATES_TAG: &str = "Observation Dates";

/// An opaque dataset identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    /// Wrap an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// What a dataset holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    /// Moving-sensor survey readings.
    SurveyData,
    /// Fixed observatory readings.
    ObservatoryData,
    /// Water depth soundings.
    BathymetryData,
}

impl DatasetType {
    /// Return the snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SurveyData => "survey_data",
            Self::ObservatoryData => "observatory_data",
            Self::BathymetryData => "bathymetry_data",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetType {
    type Err = IoError;

    /// Parse `survey_data`, `Survey Data`, `survey-data` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "survey_data" | "survey" => Ok(Self::SurveyData),
            "observatory_data" | "observatory" => Ok(Self::ObservatoryData),
            "bathymetry_data" | "bathymetry" => Ok(Self::BathymetryData),
            _ => Err(IoError::UnknownDatasetType { name: s.to_string() }),
        }
    }
}

/// Where a dataset is in the processing lifecycle.
///
/// ```text
/// Detached -> Linked -> DiurnallyCorrected -> ResidualsComputed -> Interpolated
///               |                                ^      |              ^
///               +--------------------------------+      +-> Annotated -+
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetState {
    /// Not attached to a project.
    #[default]
    Detached,
    /// Attached to a project.
    Linked,
    /// Observatory baseline removed.
    DiurnallyCorrected,
    /// Residual columns added.
    ResidualsComputed,
    /// Gridded to a raster.
    Interpolated,
    /// Annotated by a user.
    Annotated,
}

impl DatasetState {
    /// Return the snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Linked => "linked",
            Self::DiurnallyCorrected => "diurnally_corrected",
            Self::ResidualsComputed => "residuals_computed",
            Self::Interpolated => "interpolated",
            Self::Annotated => "annotated",
        }
    }

    /// Return true if `self` is `target` or lies after it in the state chain.
    ///
    /// `Annotated` and `Interpolated` sit on parallel branches after
    /// `ResidualsComputed`, so neither has reached the other.
    #[must_use]
    pub fn has_reached(self, target: Self) -> bool {
        use DatasetState::*;
        self == target
            || match self {
                Detached => false,
                Linked => target == Detached,
                DiurnallyCorrected => matches!(target, Detached | Linked),
                ResidualsComputed | Annotated | Interpolated => {
                    matches!(target, Detached | Linked | DiurnallyCorrected | ResidualsComputed)
                }
            }
    }

    /// Return true if `self -> next` is a legal single step.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        use DatasetState::*;
        matches!(
            (self, next),
            (Detached, Linked)
                | (Linked, DiurnallyCorrected)
                | (Linked | DiurnallyCorrected, ResidualsComputed)
                | (ResidualsComputed, Interpolated | Annotated)
                | (Annotated, Interpolated)
        )
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidTransition`] if the step is not allowed.
    pub fn transition(self, next: Self) -> Result<Self, IoError> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(IoError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Move to `next` unless this state has already reached it (see
    /// [`DatasetState::has_reached`]), in which case the state is unchanged.
    /// Re-running a stage does not regress a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidTransition`] if `next` has not been reached
    /// and is not one legal step away, e.g. `Interpolated -> Annotated`.
    pub fn advance(self, next: Self) -> Result<Self, IoError> {
        if self.has_reached(next) {
            Ok(self)
        } else {
            self.transition(next)
        }
    }
}

impl fmt::Display for DatasetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetState {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "detached" => Ok(Self::Detached),
            "linked" => Ok(Self::Linked),
            "diurnally_corrected" => Ok(Self::DiurnallyCorrected),
            "residuals_computed" => Ok(Self::ResidualsComputed),
            "interpolated" => Ok(Self::Interpolated),
            "annotated" => Ok(Self::Annotated),
            _ => Err(IoError::UnknownDatasetState { name: s.to_string() }),
        }
    }
}

/// A dataset known to the pipeline: where its table lives, what it holds,
/// and free-form tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    id: DatasetId,
    path: PathBuf,
    kind: DatasetType,
    state: DatasetState,
    tags: BTreeMap<String, String>,
}

impl Dataset {
    /// Create a detached dataset with no tags.
    #[must_use]
    pub fn new(id: DatasetId, path: &Path, kind: DatasetType) -> Self {
        Self {
            id,
            path: path.to_path_buf(),
            kind,
            state: DatasetState::Detached,
            tags: BTreeMap::new(),
        }
    }

    /// Set the lifecycle state directly, without validation.
    #[must_use]
    pub fn with_state(mut self, state: DatasetState) -> Self {
        self.state = state;
        self
    }

    /// Add or replace a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Return the identifier.
    #[must_use]
    pub fn id(&self) -> &DatasetId {
        &self.id
    }

    /// Return the table path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the dataset type.
    #[must_use]
    pub fn kind(&self) -> DatasetType {
        self.kind
    }

    /// Return the lifecycle state.
    #[must_use]
    pub fn state(&self) -> DatasetState {
        self.state
    }

    /// Return all tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Return one tag.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Return the `"Observation Dates"` tag, if set.
    #[must_use]
    pub fn observation_dates(&self) -> Option<&str> {
        self.tag(OBSERVATION_DATES_TAG)
    }

    /// Set the lifecycle state after validating the step with
    /// [`DatasetState::advance`].
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidTransition`] if the step is not allowed.
    pub fn advance(&mut self, next: DatasetState) -> Result<DatasetState, IoError> {
        self.state = self.state.advance(next)?;
        Ok(self.state)
    }

    /// Add or replace a tag in place.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }
}

/// A validated base name for output files.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputName(String);

impl OutputName {
    /// Parse and validate an output name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidOutputName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, IoError> {
        let name = name.into();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(IoError::InvalidOutputName { name });
        }
        Ok(Self(name))
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
