//! CLI command definitions for ts-forge.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::Parser;
use tracing::{info, warn};

use crate::config::{load_pipeline, StorageConfig, ValidatedPipeline};
use crate::dataset::flags;
use crate::pipeline::{Pipeline, RunSummary, RuntimeSettings, UnitStatus};
use crate::storage::{fetch_data, read_stored, store_ancillary};

/// Config-driven pipeline for time-series scientific data.
#[derive(Parser)]
#[command(name = "ts-forge")]
#[command(about = "Ingest, standardize, quality-check and store time-series datasets")]
#[command(version)]
#[command(
    long_about = "ts-forge turns raw instrument files into standardized, quality-controlled datasets.\n\nEach pipeline is described by YAML documents for its retriever, dataset, quality and storage components.\n\nExample usage:\n  ts-forge run pipelines/met/pipeline.yaml --summary run.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a pipeline over its inputs.
    Run(RunArgs),

    /// Validate a pipeline and its component documents without running it.
    Validate(ValidateArgs),

    /// Print the contents of a stored dataset file.
    Inspect(InspectArgs),

    /// List stored datasets of a datastream within a time range.
    Fetch(FetchArgs),

    /// Store non-dataset files next to a datastream's output.
    Ancillary(AncillaryArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Pipeline document.
    pub pipeline: PathBuf,

    /// Units processed concurrently (overrides settings and TSFORGE_WORKERS).
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Process these files instead of discovering inputs under the retriever root.
    #[arg(short = 'i', long = "input", num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Storage root (overrides the storage document and TSFORGE_STORAGE_ROOT).
    #[arg(long)]
    pub storage_root: Option<PathBuf>,

    /// Replace existing outputs.
    #[arg(long)]
    pub overwrite: bool,

    /// Write the run summary as JSON to this path.
    #[arg(short = 's', long)]
    pub summary: Option<PathBuf>,

    /// Print the run summary as JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Pipeline document.
    pub pipeline: PathBuf,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Stored dataset file (.json or .parquet).
    pub file: PathBuf,

    /// Print every value instead of a per-variable overview.
    #[arg(long)]
    pub values: bool,
}

#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Pipeline document whose storage settings locate the data.
    pub pipeline: PathBuf,

    /// Datastream name, e.g. sgp.met.a1.
    #[arg(short = 'd', long)]
    pub datastream: String,

    /// Range start (RFC 3339, `YYYY-MM-DD` or `YYYYMMDD.HHMMSS`).
    #[arg(long)]
    pub start: String,

    /// Range end (same formats as --start).
    #[arg(long)]
    pub end: String,

    /// Storage root (overrides the storage document).
    #[arg(long)]
    pub storage_root: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct AncillaryArgs {
    /// Pipeline document whose storage settings locate the data.
    pub pipeline: PathBuf,

    /// Datastream the files belong to.
    #[arg(short = 'd', long)]
    pub datastream: String,

    /// Files to store.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Validate(args) => run_validate_command(args),
        Commands::Inspect(args) => run_inspect_command(args),
        Commands::Fetch(args) => run_fetch_command(args),
        Commands::Ancillary(args) => run_ancillary_command(args),
    }
}

// ============================================================================
// Run
// ============================================================================

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let config = load_pipeline(&args.pipeline)
        .with_context(|| format!("loading pipeline {}", args.pipeline.display()))?;
    for warning in config.all_warnings() {
        warn!(pipeline = %config.name(), "{warning}");
    }

    let mut settings = RuntimeSettings::from_document(&config.document.settings).with_env()?;
    if let Some(workers) = args.workers {
        settings = settings.with_workers(workers);
    }
    if let Some(root) = args.storage_root {
        settings = settings.with_storage_root(root);
    }
    if args.overwrite {
        settings = settings.with_overwrite(true);
    }
    let pipeline = Pipeline::new(config, settings)?;

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; units not yet storing will be cancelled");
            cancel.cancel();
        }
    });

    let summary = if args.inputs.is_empty() {
        pipeline.run().await
    } else {
        let units = pipeline
            .units_for_files(&args.inputs)
            .context("grouping input files into units")?;
        pipeline.run_units(units).await
    };

    let json = summary.to_json().context("serializing run summary")?;
    if let Some(path) = &args.summary {
        fs::write(path, &json).with_context(|| format!("writing summary {}", path.display()))?;
        info!(path = %path.display(), "Wrote run summary");
    }
    if args.json {
        println!("{json}");
    } else {
        print_summary(&summary);
    }

    if !summary.is_success() {
        anyhow::bail!(
            "{} of {} unit(s) failed",
            summary.stats.failed,
            summary.stats.total
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== {} ({}) ===", summary.pipeline, summary.run_id);
    println!("Units:             {}", summary.stats.total);
    println!("Succeeded:         {}", summary.stats.succeeded);
    println!("Partially flagged: {}", summary.stats.partially_flagged);
    println!("Failed:            {}", summary.stats.failed);
    println!("Avg duration:      {:.1}ms", summary.stats.average_duration_ms);
    println!();

    for report in summary.units.values() {
        match report.status {
            UnitStatus::Failed => {
                let failure = report.failure.as_ref();
                println!(
                    "  {} [{}] at {}",
                    report.unit,
                    report.status,
                    failure.map(|f| f.stage.to_string()).unwrap_or_default()
                );
                if let Some(failure) = failure {
                    println!("    {}: {}", failure.kind, failure.message);
                }
            }
            _ => {
                let path = report
                    .output
                    .as_ref()
                    .map(|o| o.path.display().to_string())
                    .unwrap_or_default();
                println!("  {} [{}] -> {}", report.unit, report.status, path);
            }
        }
        for test in report.quality.iter().filter(|t| t.violations > 0) {
            println!("    {} ({}): {} violation(s)", test.test, test.check, test.violations);
        }
    }
}

// ============================================================================
// Validate / Inspect
// ============================================================================

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let config = load_pipeline(&args.pipeline)
        .with_context(|| format!("validating pipeline {}", args.pipeline.display()))?;

    println!("Pipeline '{}' is valid", config.name());
    println!("  sources:  {}", config.retriever.sources.len());
    println!(
        "  dataset:  {} coordinate(s), {} data variable(s)",
        config.dataset.coords.len(),
        config.dataset.data_vars.len()
    );
    println!("  tests:    {}", config.quality.tests.len());
    println!(
        "  storage:  {} under {}",
        config.storage.format.extension(),
        config.storage.root.display()
    );
    let warnings = config.all_warnings();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }
    Ok(())
}

fn run_inspect_command(args: InspectArgs) -> anyhow::Result<()> {
    let stored = read_stored(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let dataset = &stored.dataset;

    println!("{}", stored.path.display());
    for (key, value) in &dataset.attrs {
        println!("  :{key} = {value}");
    }
    for (section, variables) in [("coords", &dataset.coords), ("data_vars", &dataset.data_vars)] {
        println!("{section}:");
        for variable in variables.values() {
            let flagged = variable.flagged_count();
            let combined = variable.flags.iter().fold(0u32, |acc, f| acc | f);
            println!(
                "  {} ({}) {} [{}] flagged={} {:?}",
                variable.name,
                variable.dims.join(", "),
                variable.dtype,
                variable.units().unwrap_or("-"),
                flagged,
                flags::describe(combined)
            );
            for meaning in flags::meanings(variable) {
                println!(
                    "    flag {:#06x} {}{}",
                    meaning.mask,
                    meaning.meaning,
                    meaning
                        .assessment
                        .as_ref()
                        .map(|a| format!(" ({a})"))
                        .unwrap_or_default()
                );
            }
            if args.values {
                println!("    data:  {}", variable.data);
                println!("    flags: {}", variable.flags);
            }
        }
    }
    if let Some(provenance) = &stored.provenance {
        println!("provenance:");
        println!("{}", serde_json::to_string_pretty(provenance)?);
    }
    Ok(())
}

// ============================================================================
// Fetch / Ancillary
// ============================================================================

fn run_fetch_command(args: FetchArgs) -> anyhow::Result<()> {
    let config = load_pipeline(&args.pipeline)
        .with_context(|| format!("loading pipeline {}", args.pipeline.display()))?;
    let start = parse_time(&args.start).with_context(|| format!("invalid --start '{}'", args.start))?;
    let end = parse_time(&args.end).with_context(|| format!("invalid --end '{}'", args.end))?;
    if end < start {
        anyhow::bail!("--end is before --start");
    }

    let storage = storage_config(&config, args.storage_root)?;
    let found = fetch_data(&storage, &args.datastream, start, end)?;
    if found.is_empty() {
        println!("No stored data for {} in range", args.datastream);
    }
    for stored in found {
        let bounds = stored.dataset.time_bounds(&storage.time_coordinate);
        match bounds {
            Some((lo, hi)) => println!("{}  [{lo} .. {hi}]", stored.path.display()),
            None => println!("{}", stored.path.display()),
        }
    }
    Ok(())
}

fn run_ancillary_command(args: AncillaryArgs) -> anyhow::Result<()> {
    let config = load_pipeline(&args.pipeline)
        .with_context(|| format!("loading pipeline {}", args.pipeline.display()))?;
    let storage = storage_config(&config, None)?;
    for file in &args.files {
        let dest = store_ancillary(&storage, file, &args.datastream)
            .with_context(|| format!("storing {}", file.display()))?;
        println!("{}", dest.display());
    }
    Ok(())
}

/// The pipeline's storage settings with the root override from the command
/// line or `TSFORGE_STORAGE_ROOT` applied.
fn storage_config(
    config: &ValidatedPipeline,
    root: Option<PathBuf>,
) -> anyhow::Result<StorageConfig> {
    let settings = RuntimeSettings::from_document(&config.document.settings).with_env()?;
    let mut storage = (*config.storage).clone();
    if let Some(root) = root.or(settings.storage_root) {
        storage.root = root;
    }
    if let Some(overwrite) = settings.overwrite {
        storage.overwrite = overwrite;
    }
    Ok(storage)
}

/// Accepts RFC 3339, a bare date, or the compact `YYYYMMDD.HHMMSS` form
/// used in output file names.
fn parse_time(value: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    if let Ok(time) = NaiveDateTime::parse_from_str(value, "%Y%m%d.%H%M%S") {
        return Ok(time.and_utc());
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| anyhow::anyhow!("invalid date"))
}
