use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use magsurvey_grid::{GridJob, InterpolationKind, interpolate_and_mask};
use magsurvey_io::{
    Dataset, DatasetId, DatasetState, DatasetType, OutputName, PointReader, RasterArtifacts,
    RasterWriter,
};
use magsurvey_pipeline::{
    CancelToken, DatasetStore, GridSummary, InMemoryCache, InMemoryDatasetStore, Pipeline, PipelineParams,
    ValueColumn,
};

#[derive(Parser)]
#[command(name = "magsurvey")]
#[command(about = "Diurnal correction, residual extraction and gridding of magnetometer surveys")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Seed for residual row ids
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for grid evaluation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Time-series parameters shared by the survey stages.
#[derive(Args, Debug, Clone)]
struct SeriesArgs {
    /// Window of the centred rolling mean applied to the observatory baseline
    #[arg(long, default_value_t = 100)]
    diurnal_window: usize,

    /// Short centred window for the observed signal
    #[arg(long, default_value_t = 100)]
    observed_window: usize,

    /// Long trailing window for the ambient field
    #[arg(long, default_value_t = 500)]
    ambient_window: usize,

    /// Readings at or below this value are treated as spikes
    #[arg(long, requires = "clip_max")]
    clip_min: Option<f64>,

    /// Readings at or above this value are treated as spikes
    #[arg(long, requires = "clip_min")]
    clip_max: Option<f64>,

    /// Comma-separated input rows to blank before smoothing
    #[arg(long, value_delimiter = ',')]
    mask_points: Vec<usize>,

    /// Wall-clock limit per stage, in seconds
    #[arg(long)]
    stage_timeout: Option<u64>,
}

/// Gridding and masking parameters.
#[derive(Args, Debug, Clone)]
struct GridArgs {
    /// Interpolation spline: "linear" or "cubic"
    #[arg(long, default_value = "linear")]
    interpolation: String,

    /// Grid cell size in projection units (at least 20)
    #[arg(long, default_value_t = 20.0)]
    grid_spacing: f64,

    /// Cells farther than this from every reading are dropped
    #[arg(long, default_value_t = 400.0)]
    max_distance: f64,

    /// Cell rows per masking chunk
    #[arg(long, default_value_t = 500_000)]
    chunk_rows: usize,

    /// Masking worker threads
    #[arg(long, default_value_t = 6)]
    workers: usize,
}

/// Where results go.
#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Base name for output files (must match [a-zA-Z0-9_-]+)
    #[arg(long)]
    name: String,

    /// Output directory for result files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Remove the observatory baseline from a survey
    Diurnal {
        /// Survey CSV/TSV file
        #[arg(long)]
        survey: PathBuf,

        /// Observatory files, merged in the order given
        #[arg(long, required = true, num_args = 1..)]
        observatory: Vec<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        series: SeriesArgs,
    },

    /// Extract residual anomalies, correcting first when observatories are given
    Residuals {
        /// Survey CSV/TSV file
        #[arg(long)]
        survey: PathBuf,

        /// Observatory files, merged in the order given
        #[arg(long, num_args = 1..)]
        observatory: Vec<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        series: SeriesArgs,
    },

    /// Grid one column of a table with Easting/Northing columns
    Interpolate {
        /// Input table, e.g. a residuals file
        #[arg(long)]
        points: PathBuf,

        /// Column to grid
        #[arg(long, default_value = "Baseline")]
        column: String,

        /// Wall-clock limit in seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// Correct, extract residuals, grid and export in one go
    Run {
        /// Survey CSV/TSV file
        #[arg(long)]
        survey: PathBuf,

        /// Observatory files, merged in the order given
        #[arg(long, num_args = 1..)]
        observatory: Vec<PathBuf>,

        /// Residual column to grid: baseline, smoothed, ambient, signal or magnetic_field
        #[arg(long, default_value = "baseline")]
        value_column: String,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        series: SeriesArgs,

        #[command(flatten)]
        grid: GridArgs,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct DiurnalOutput {
    name: String,
    n_rows: usize,
    n_fallback: usize,
    resampled: bool,
    baseline_mean: f64,
    observation_dates: Option<String>,
    corrected: Option<PathBuf>,
}

#[derive(Serialize)]
struct ResidualsOutput {
    name: String,
    n_rows: usize,
    diurnally_corrected: bool,
    observation_dates: Option<String>,
    residuals: Option<PathBuf>,
}

#[derive(Serialize)]
struct InterpolateOutput {
    name: String,
    column: String,
    n_points: usize,
    grid: GridSummary,
    files: RasterArtifacts,
}

fn parse_interpolation(s: &str) -> Result<InterpolationKind> {
    match s {
        "linear" => Ok(InterpolationKind::Linear),
        "cubic" => Ok(InterpolationKind::Cubic),
        other => anyhow::bail!("unknown interpolation: {other} (expected linear or cubic)"),
    }
}

fn parse_value_column(s: &str) -> Result<ValueColumn> {
    match s {
        "baseline" => Ok(ValueColumn::Baseline),
        "smoothed" => Ok(ValueColumn::Smoothed),
        "ambient" => Ok(ValueColumn::Ambient),
        "signal" => Ok(ValueColumn::Signal),
        "magnetic_field" => Ok(ValueColumn::MagneticField),
        other => anyhow::bail!(
            "unknown value column: {other} (expected baseline, smoothed, ambient, signal, or magnetic_field)"
        ),
    }
}

fn series_params(params: PipelineParams, args: &SeriesArgs, seed: u64) -> Result<PipelineParams> {
    let mut params = params
        .with_diurnal_window(args.diurnal_window)?
        .with_windows(args.observed_window, args.ambient_window)?
        .with_points_to_mask(args.mask_points.iter().copied())
        .with_seed(seed);
    if let (Some(min), Some(max)) = (args.clip_min, args.clip_max) {
        params = params.with_clip(min, max)?;
    }
    if let Some(secs) = args.stage_timeout {
        params = params.with_stage_timeout(Duration::from_secs(secs));
    }
    Ok(params)
}

fn grid_params(params: PipelineParams, args: &GridArgs) -> Result<PipelineParams> {
    Ok(params
        .with_interpolation(parse_interpolation(&args.interpolation)?)
        .with_grid_spacing(args.grid_spacing)?
        .with_max_distance(args.max_distance)?
        .with_masking(args.chunk_rows, args.workers)?)
}

/// Register the input files as linked datasets, keyed by their paths.
fn register(
    survey: &Path,
    observatories: &[PathBuf],
) -> (InMemoryDatasetStore, DatasetId, Vec<DatasetId>) {
    let store = InMemoryDatasetStore::new();
    let survey_id = DatasetId::new(survey.display().to_string());
    store.insert(
        Dataset::new(survey_id.clone(), survey, DatasetType::SurveyData)
            .with_state(DatasetState::Linked),
    );
    let observatory_ids = observatories
        .iter()
        .map(|path| {
            let id = DatasetId::new(path.display().to_string());
            store.insert(
                Dataset::new(id.clone(), path, DatasetType::ObservatoryData)
                    .with_state(DatasetState::Linked),
            );
            id
        })
        .collect();
    (store, survey_id, observatory_ids)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Configure Rayon thread pool
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    let cache = InMemoryCache::new();

    match cli.command {
        Command::Diurnal {
            survey,
            observatory,
            output,
            series,
        } => {
            let name = OutputName::new(&output.name).context("invalid output name")?;
            let params = series_params(PipelineParams::new(), &series, cli.seed)?;
            let (store, survey_id, observatory_ids) = register(&survey, &observatory);
            let pipeline = Pipeline::new(params, &store, &cache);

            let corrected = pipeline
                .diurnal(&survey_id, &observatory_ids)
                .context("diurnal correction failed")?;
            let files = pipeline
                .export(&output.output_dir, &name, Some(&corrected.value), None, None)
                .context("failed to write corrected survey")?;

            let output = DiurnalOutput {
                name: output.name,
                n_rows: corrected.value.series().len(),
                n_fallback: corrected.value.n_fallback(),
                resampled: corrected.value.resampled(),
                baseline_mean: corrected.value.baseline_mean(),
                observation_dates: observation_dates(&store, &survey_id),
                corrected: files.corrected,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Residuals {
            survey,
            observatory,
            output,
            series,
        } => {
            let name = OutputName::new(&output.name).context("invalid output name")?;
            let params = series_params(PipelineParams::new(), &series, cli.seed)?;
            let (store, survey_id, observatory_ids) = register(&survey, &observatory);
            let pipeline = Pipeline::new(params, &store, &cache);

            let corrected = if observatory_ids.is_empty() {
                None
            } else {
                Some(
                    pipeline
                        .diurnal(&survey_id, &observatory_ids)
                        .context("diurnal correction failed")?,
                )
            };
            let residuals = pipeline
                .residuals(&survey_id, corrected.as_ref())
                .context("residual extraction failed")?;
            let files = pipeline
                .export(&output.output_dir, &name, None, Some(&residuals.value), None)
                .context("failed to write residuals")?;

            let output = ResidualsOutput {
                name: output.name,
                n_rows: residuals.value.len(),
                diurnally_corrected: corrected.is_some(),
                observation_dates: observation_dates(&store, &survey_id),
                residuals: files.residuals,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Interpolate {
            points,
            column,
            timeout,
            output,
            grid,
        } => {
            let name = OutputName::new(&output.name).context("invalid output name")?;
            let params = grid_params(PipelineParams::new(), &grid)?;
            let points_read = PointReader::new(&points, &column)
                .read()
                .with_context(|| format!("failed to read points from {}", points.display()))?;
            info!(n_points = points_read.len(), column = %column, "loaded points");

            let job: GridJob = params.grid_job()?;
            let budget = CancelToken::new().budget(timeout.map(Duration::from_secs));
            let masked =
                interpolate_and_mask(&points_read, &job, &budget).context("gridding failed")?;
            let files = RasterWriter::new(&output.output_dir, name)?
                .write(&masked.grid)
                .context("failed to write raster")?;

            let output = InterpolateOutput {
                name: output.name,
                column,
                n_points: points_read.len(),
                grid: GridSummary::from(&masked),
                files,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Run {
            survey,
            observatory,
            value_column,
            output,
            series,
            grid,
        } => {
            let name = OutputName::new(&output.name).context("invalid output name")?;
            let params = series_params(PipelineParams::new(), &series, cli.seed)?;
            let params = grid_params(params, &grid)?
                .with_value_column(parse_value_column(&value_column)?);
            let (store, survey_id, observatory_ids) = register(&survey, &observatory);

            let report = Pipeline::new(params, &store, &cache)
                .run(
                    &survey_id,
                    &observatory_ids,
                    Some((output.output_dir.as_path(), &name)),
                )
                .context("pipeline run failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn observation_dates(store: &InMemoryDatasetStore, id: &DatasetId) -> Option<String> {
    store
        .get(id)
        .ok()
        .and_then(|d| d.observation_dates().map(str::to_string))
}
