//! The stage driver: diurnal correction, residual extraction, gridding and
//! export over datasets held in a [`DatasetStore`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use magsurvey_grid::{MaskedGrid, ScatteredPoint, interpolate_and_mask};
use magsurvey_io::{
    Dataset, DatasetId, DatasetState, DatasetType, OBSERVATION_DATES_TAG, ObservatoryReader,
    OutputName, RasterArtifacts, RasterWriter, SurveyReader, TableWriter, observation_dates,
};
use magsurvey_series::{CorrectedSeries, ResidualSeries, Series, Timestamped};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cache::{self, ResultCache, diurnal_key, grid_key, residuals_key};
use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::params::PipelineParams;
use crate::progress::{ProgressReporter, Stage};
use crate::store::DatasetStore;

/// A stage output together with the cache key it is stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult<T> {
    /// The stage output.
    pub value: T,
    /// Cache key identifying this output.
    pub cache_key: String,
    /// True if the output came from the cache.
    pub cached: bool,
}

/// Files written by [`Pipeline::export`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportedFiles {
    /// `{name}_corrected.csv`
    pub corrected: Option<PathBuf>,
    /// `{name}_residuals.csv`
    pub residuals: Option<PathBuf>,
    /// Raster, world file and cell table.
    pub raster: Option<RasterArtifacts>,
    /// `{name}_summary.json`, written by [`Pipeline::run`].
    pub summary: Option<PathBuf>,
}

/// Shape and statistics of a masked grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    /// Columns.
    pub width: usize,
    /// Rows.
    pub height: usize,
    /// Cell size.
    pub spacing: f64,
    /// Cells surviving the masks.
    pub n_cells: usize,
    /// Range of the gridded input values.
    pub value_range: (f64, f64),
    /// Input points.
    pub n_input: usize,
    /// Points after block reduction.
    pub n_reduced: usize,
}

impl From<&MaskedGrid> for GridSummary {
    fn from(masked: &MaskedGrid) -> Self {
        Self {
            width: masked.grid.width(),
            height: masked.grid.height(),
            spacing: masked.grid.spacing(),
            n_cells: masked.cells.len(),
            value_range: masked.value_range,
            n_input: masked.n_input,
            n_reduced: masked.n_reduced,
        }
    }
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Survey dataset.
    pub survey: DatasetId,
    /// Observatory datasets used for correction, in order.
    pub observatories: Vec<DatasetId>,
    /// Survey state after the run.
    pub state: DatasetState,
    /// `"Observation Dates"` tag of the survey.
    pub observation_dates: Option<String>,
    /// Survey rows corrected, when a diurnal stage ran.
    pub n_corrected: Option<usize>,
    /// Rows that fell back to the raw field.
    pub n_fallback: Option<usize>,
    /// True if the observatory was resampled.
    pub resampled: Option<bool>,
    /// Residual rows.
    pub n_residuals: usize,
    /// Grid statistics.
    pub grid: GridSummary,
    /// Stages answered from the cache.
    pub cache_hits: usize,
    /// Progress events dropped because no one was listening fast enough.
    pub progress_dropped: usize,
    /// Files written, when an output directory was given.
    pub outputs: Option<ExportedFiles>,
    /// Parameters of the run.
    pub params: PipelineParams,
}

/// Drives the stages over stored datasets.
///
/// Every stage checks the cancel token on entry, consults the cache, and
/// advances the survey's [`DatasetState`] through the store once it
/// succeeds. Stage outputs are deterministic, so a cache hit is
/// indistinguishable from a recomputation.
pub struct Pipeline<'a> {
    params: PipelineParams,
    store: &'a dyn DatasetStore,
    cache: &'a dyn ResultCache,
    progress: ProgressReporter,
    cancel: CancelToken,
    cache_ttl: Option<Duration>,
    cache_hits: AtomicUsize,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline with no progress reporting and a fresh cancel token.
    #[must_use]
    pub fn new(
        params: PipelineParams,
        store: &'a dyn DatasetStore,
        cache: &'a dyn ResultCache,
    ) -> Self {
        Self {
            params,
            store,
            cache,
            progress: ProgressReporter::disabled(),
            cancel: CancelToken::new(),
            cache_ttl: None,
            cache_hits: AtomicUsize::new(0),
        }
    }

    /// Report progress through `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Observe `cancel`.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Expire cached outputs after `ttl`.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Return the parameters.
    #[must_use]
    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Return the cancel token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Return the number of stages answered from the cache so far.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Diurnally correct a survey against one or more observatory datasets.
    ///
    /// Observatory files are merged in the order given. Sets the survey's
    /// `"Observation Dates"` tag if it is missing and advances it to
    /// [`DatasetState::DiurnallyCorrected`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`PipelineError::InvalidParameter`] | `observatories` is empty |
    /// | [`PipelineError::DatasetNotFound`] | An id is unknown |
    /// | [`PipelineError::WrongDatasetType`] | A dataset has the wrong type |
    /// | [`PipelineError::Io`] | A file cannot be read, or the state step is illegal |
    /// | [`PipelineError::Series`] | Alignment or correction fails |
    /// | [`PipelineError::Cancelled`] / [`PipelineError::TimedOut`] | The stage was stopped |
    #[instrument(skip_all, fields(survey = %survey, n_observatories = observatories.len()))]
    pub fn diurnal(
        &self,
        survey: &DatasetId,
        observatories: &[DatasetId],
    ) -> Result<StageResult<CorrectedSeries>, PipelineError> {
        let stage = Stage::Diurnal;
        self.cancel.check(stage)?;
        let started = Instant::now();
        if observatories.is_empty() {
            return Err(PipelineError::InvalidParameter {
                name: "observatories",
                reason: "at least one observatory dataset is required".into(),
            });
        }
        let survey_ds = self.dataset(survey, DatasetType::SurveyData)?;
        let observatory_ds = observatories
            .iter()
            .map(|id| self.dataset(id, DatasetType::ObservatoryData))
            .collect::<Result<Vec<_>, _>>()?;

        let key = diurnal_key(survey, observatories, self.params.diurnal_window());
        let result = self.cached(stage, started, key, || {
            self.progress.report(Stage::Load, format!("reading {survey}"));
            let series = SurveyReader::new(survey_ds.path()).read()?;
            let observatory =
                ObservatoryReader::new(observatory_ds.iter().map(Dataset::path)).read()?;
            self.cancel.check(stage)?;
            self.progress.report(stage, "aligning observatory baseline");
            Ok(self.params.diurnal_config().correct(&series, &observatory)?)
        })?;

        self.tag_observation_dates(&survey_ds, result.value.series())?;
        self.store
            .update_state(survey, DatasetState::DiurnallyCorrected)?;
        if result.value.n_fallback() > 0 {
            warn!(
                n_fallback = result.value.n_fallback(),
                "rows without a baseline kept their raw field"
            );
        }
        self.progress.report(
            stage,
            format!("corrected {} rows", result.value.series().len()),
        );
        Ok(result)
    }

    /// Extract residuals from a survey.
    ///
    /// With `corrected`, the output of [`diurnal`](Self::diurnal) is used;
    /// otherwise the survey file is read as is. Advances the survey to
    /// [`DatasetState::ResidualsComputed`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`PipelineError::DatasetNotFound`] | Unknown id |
    /// | [`PipelineError::WrongDatasetType`] | Not a survey |
    /// | [`PipelineError::Io`] | The file cannot be read, or the state step is illegal |
    /// | [`PipelineError::Series`] | Extraction fails |
    /// | [`PipelineError::Cancelled`] / [`PipelineError::TimedOut`] | The stage was stopped |
    #[instrument(skip_all, fields(survey = %survey, corrected = corrected.is_some()))]
    pub fn residuals(
        &self,
        survey: &DatasetId,
        corrected: Option<&StageResult<CorrectedSeries>>,
    ) -> Result<StageResult<ResidualSeries>, PipelineError> {
        let stage = Stage::Residuals;
        self.cancel.check(stage)?;
        let started = Instant::now();
        let survey_ds = self.dataset(survey, DatasetType::SurveyData)?;

        let source = corrected.map_or_else(|| format!("raw:{survey}"), |c| c.cache_key.clone());
        let key = residuals_key(&source, &self.params.residual_fingerprint());
        let result = self.cached(stage, started, key, || {
            let config = self.params.residual_config()?;
            let residuals = match corrected {
                Some(c) => config.extract(c.value.series())?,
                None => {
                    self.progress.report(Stage::Load, format!("reading {survey}"));
                    let series = SurveyReader::new(survey_ds.path()).read()?;
                    config.extract(&series)?
                }
            };
            Ok(residuals)
        })?;

        self.tag_observation_dates(&survey_ds, &result.value)?;
        self.store
            .update_state(survey, DatasetState::ResidualsComputed)?;
        self.progress.report(
            stage,
            format!("extracted {} residual rows", result.value.len()),
        );
        Ok(result)
    }

    /// Grid and mask the selected residual column.
    ///
    /// Rows without projected coordinates are skipped. Cancellation and the
    /// stage timeout are honoured inside the interpolation and masking loops.
    /// Advances the survey to [`DatasetState::Interpolated`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`PipelineError::MissingCoordinates`] | No row has easting and northing |
    /// | [`PipelineError::Grid`] | Interpolation or masking fails |
    /// | [`PipelineError::Cancelled`] / [`PipelineError::TimedOut`] | The stage was stopped |
    /// | [`PipelineError::Io`] | The state step is illegal |
    #[instrument(skip_all, fields(survey = %survey, column = self.params.value_column().as_str()))]
    pub fn interpolate(
        &self,
        survey: &DatasetId,
        residuals: &StageResult<ResidualSeries>,
    ) -> Result<StageResult<MaskedGrid>, PipelineError> {
        let stage = Stage::Interpolate;
        self.cancel.check(stage)?;
        let started = Instant::now();
        self.dataset(survey, DatasetType::SurveyData)?;

        let key = grid_key(&residuals.cache_key, &self.params.grid_fingerprint());
        let result = self.cached(stage, started, key, || {
            let column = self.params.value_column();
            let points: Vec<ScatteredPoint> = residuals
                .value
                .records()
                .iter()
                .filter_map(|r| {
                    r.projected()
                        .map(|p| ScatteredPoint::new(p.easting, p.northing, column.value(r)))
                })
                .collect();
            if points.is_empty() {
                return Err(PipelineError::MissingCoordinates { id: survey.clone() });
            }
            debug!(n_points = points.len(), "gridding residuals");
            self.progress
                .report(stage, format!("gridding {} points", points.len()));

            let job = self.params.grid_job()?;
            let budget = self.cancel.budget(self.params.stage_timeout());
            interpolate_and_mask(&points, &job, &budget)
                .map_err(|e| PipelineError::from_grid(stage, e))
        })?;

        self.store.update_state(survey, DatasetState::Interpolated)?;
        self.progress.report(
            stage,
            format!(
                "{}x{} grid, {} cells kept",
                result.value.grid.width(),
                result.value.grid.height(),
                result.value.cells.len()
            ),
        );
        Ok(result)
    }

    /// Write whichever outputs are given to `output_dir`, named after `name`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`PipelineError::Io`] | A file cannot be written |
    /// | [`PipelineError::Cancelled`] | The token was set before writing |
    #[instrument(skip_all, fields(dir = %output_dir.display(), name = %name))]
    pub fn export(
        &self,
        output_dir: &Path,
        name: &OutputName,
        corrected: Option<&CorrectedSeries>,
        residuals: Option<&ResidualSeries>,
        grid: Option<&MaskedGrid>,
    ) -> Result<ExportedFiles, PipelineError> {
        let stage = Stage::Export;
        self.cancel.check(stage)?;
        let tables = TableWriter::new(output_dir, name.clone())?;
        let mut files = ExportedFiles::default();
        if let Some(corrected) = corrected {
            files.corrected = Some(tables.write_corrected(corrected.series())?);
        }
        if let Some(residuals) = residuals {
            files.residuals = Some(tables.write_residuals(residuals)?);
        }
        if let Some(grid) = grid {
            let writer = RasterWriter::new(output_dir, name.clone())?;
            files.raster = Some(writer.write(&grid.grid)?);
        }
        self.progress
            .report(stage, format!("outputs written to {}", output_dir.display()));
        Ok(files)
    }

    /// Run every stage: diurnal correction when observatories are given,
    /// then residuals, gridding, and export when `output` is given.
    ///
    /// # Errors
    ///
    /// Any error of the individual stages.
    #[instrument(skip_all, fields(survey = %survey))]
    pub fn run(
        &self,
        survey: &DatasetId,
        observatories: &[DatasetId],
        output: Option<(&Path, &OutputName)>,
    ) -> Result<RunReport, PipelineError> {
        let corrected = if observatories.is_empty() {
            None
        } else {
            Some(self.diurnal(survey, observatories)?)
        };
        let residuals = self.residuals(survey, corrected.as_ref())?;
        let grid = self.interpolate(survey, &residuals)?;

        let outputs = match output {
            Some((dir, name)) => Some(self.export(
                dir,
                name,
                corrected.as_ref().map(|c| &c.value),
                Some(&residuals.value),
                Some(&grid.value),
            )?),
            None => None,
        };

        let dataset = self.store.get(survey)?;
        let mut report = RunReport {
            survey: survey.clone(),
            observatories: observatories.to_vec(),
            state: dataset.state(),
            observation_dates: dataset.observation_dates().map(str::to_string),
            n_corrected: corrected.as_ref().map(|c| c.value.series().len()),
            n_fallback: corrected.as_ref().map(|c| c.value.n_fallback()),
            resampled: corrected.as_ref().map(|c| c.value.resampled()),
            n_residuals: residuals.value.len(),
            grid: GridSummary::from(&grid.value),
            cache_hits: self.cache_hits(),
            progress_dropped: self.progress.dropped(),
            outputs,
            params: self.params.clone(),
        };
        if let Some((dir, name)) = output {
            let summary = TableWriter::new(dir, name.clone())?.write_summary(&report)?;
            if let Some(files) = report.outputs.as_mut() {
                files.summary = Some(summary);
            }
        }

        info!(
            state = %report.state,
            n_cells = report.grid.n_cells,
            cache_hits = report.cache_hits,
            "pipeline run complete"
        );
        Ok(report)
    }

    fn dataset(&self, id: &DatasetId, expected: DatasetType) -> Result<Dataset, PipelineError> {
        let dataset = self.store.get(id)?;
        if dataset.kind() != expected {
            return Err(PipelineError::WrongDatasetType {
                id: id.clone(),
                expected,
                got: dataset.kind(),
            });
        }
        Ok(dataset)
    }

    /// Return the cached value under `key`, or compute and store it. A
    /// result that finished past the stage timeout is not stored.
    fn cached<T, F>(
        &self,
        stage: Stage,
        started: Instant,
        key: String,
        compute: F,
    ) -> Result<StageResult<T>, PipelineError>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Result<T, PipelineError>,
    {
        if let Some(value) = cache::load(self.cache, &key)? {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.progress.report(stage, "using cached result");
            self.finish(stage, started)?;
            return Ok(StageResult {
                value,
                cache_key: key,
                cached: true,
            });
        }
        let value = compute()?;
        self.finish(stage, started)?;
        cache::store(self.cache, &key, &value, self.cache_ttl)?;
        Ok(StageResult {
            value,
            cache_key: key,
            cached: false,
        })
    }

    /// Fail a stage that finished after its timeout. Only the grid stage can
    /// be interrupted mid-way; the others are checked on completion.
    fn finish(&self, stage: Stage, started: Instant) -> Result<(), PipelineError> {
        let elapsed = started.elapsed();
        debug!(%stage, elapsed_ms = elapsed.as_millis() as u64, "stage finished");
        if let Some(timeout) = self.params.stage_timeout()
            && elapsed > timeout
        {
            return Err(PipelineError::TimedOut { stage });
        }
        Ok(())
    }

    fn tag_observation_dates<R: Timestamped>(
        &self,
        dataset: &Dataset,
        series: &Series<R>,
    ) -> Result<(), PipelineError> {
        if dataset.observation_dates().is_some() {
            return Ok(());
        }
        if let Some((start, end)) = series.time_range() {
            self.store.set_tag(
                dataset.id(),
                OBSERVATION_DATES_TAG,
                &observation_dates(start, end),
            )?;
        }
        Ok(())
    }
}
