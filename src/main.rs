//! predsel CLI - labeled training data for solver-strategy selection.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use predsel::backend::Labeler;
use predsel::engine::CommandEngine;
use predsel::format::{feature_format, predicate_format};
use predsel::models::{Config, FormatKind, GenerationStats, LabelKind};
use predsel::pipeline::{
    GenerationOptions, Generator, MigrationOptions, NumericSamples, PredicateSamples, RunSummary,
    migrate_corpus, split_file, trim_file,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "predsel")]
#[command(version)]
#[command(about = "Labeled training data for solver-strategy selection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "predsel.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Label the formulas of every source model and write sample files
    Generate {
        /// Directory of source models
        #[arg(short, long)]
        source: PathBuf,

        /// Output directory
        #[arg(short, long)]
        target: PathBuf,

        /// Output format (json, predicate-db, csv, pdump)
        #[arg(short, long)]
        format: Option<FormatKind>,

        /// Label kind (timings, classification)
        #[arg(short, long)]
        label: Option<LabelKind>,

        /// Regenerate files whose target already exists
        #[arg(long)]
        eager: bool,

        /// Source files processed concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Re-encode a sample corpus in another format
    Migrate {
        /// Source corpus directory
        #[arg(long)]
        source: PathBuf,

        /// Format of the source corpus
        #[arg(long)]
        source_format: FormatKind,

        /// Output directory
        #[arg(long)]
        target: PathBuf,

        /// Format to write
        #[arg(long)]
        target_format: FormatKind,

        /// Backend names of positional predicate dumps, comma separated
        #[arg(long, value_delimiter = ',')]
        backend_names: Option<Vec<String>>,

        /// Files converted concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Label columns of CSV input without a header row
        #[arg(long)]
        label_columns: Option<usize>,

        /// Write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Split a sample file into two deterministic partitions
    Split {
        /// Sample file
        #[arg(short, long)]
        input: PathBuf,

        /// Format of the sample file
        #[arg(short, long)]
        format: FormatKind,

        /// Share of samples in the first partition
        #[arg(short, long)]
        ratio: f64,

        /// Shuffle seed (defaults to the configured split seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Output directory of the first partition
        #[arg(long)]
        first: PathBuf,

        /// Output directory of the second partition
        #[arg(long)]
        second: PathBuf,

        /// Label columns of CSV input without a header row
        #[arg(long)]
        label_columns: Option<usize>,
    },

    /// Keep only the leading samples of a sample file
    Trim {
        /// Sample file
        #[arg(short, long)]
        input: PathBuf,

        /// Format of the sample file
        #[arg(short, long)]
        format: FormatKind,

        /// Samples to keep
        #[arg(short, long)]
        max: usize,

        /// Output directory
        #[arg(short, long)]
        target: PathBuf,

        /// Label columns of CSV input without a header row
        #[arg(long)]
        label_columns: Option<usize>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

/// The configuration if the file exists, defaults otherwise.
fn load_config_or_default(path: &Path, label_columns: Option<usize>) -> Result<Config> {
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        info!(path = %path.display(), "No configuration file, using defaults");
        Config::default()
    };
    if label_columns.is_some() {
        config.output.csv_label_columns = label_columns;
    }
    Ok(config)
}

fn print_stats(title: &str, stats: &GenerationStats, summary: &RunSummary) {
    println!("\n=== {title} ===");
    println!("Files seen:        {}", stats.files_seen);
    println!("Files created:     {}", stats.files_created);
    println!("Files skipped:     {}", stats.files_skipped);
    println!("Files with errors: {}", stats.files_with_errors);
    println!("Samples written:   {}", stats.samples_written);
    println!("Samples failed:    {}", stats.samples_failed);
    println!("Formulas skipped:  {}", stats.formulas_skipped);
    println!("Runtime:           {:.1}s", summary.runtime_secs);
}

fn finish(
    command: &str,
    title: &str,
    started_at: chrono::DateTime<Utc>,
    stats: GenerationStats,
    summary_path: Option<&Path>,
) -> Result<()> {
    let summary = RunSummary::new(command, started_at, stats);
    print_stats(title, &stats, &summary);
    if let Some(path) = summary_path {
        summary
            .write_to(path)
            .with_context(|| format!("Failed to write summary to {path:?}"))?;
        println!("Summary:           {path:?}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            println!("{}", Config::example());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            let labeler = Labeler::from_config(&config).context("Invalid backend configuration")?;

            info!("Configuration is valid");
            info!("  Engine: {}", config.engine.resolved_command());
            info!(
                "  Labels: {} with sampling size {}",
                labeler.kind(),
                labeler.sampling_size()
            );
            for backend in labeler.backends() {
                info!(
                    "  Backend: {} ({}, {:?})",
                    backend.name(),
                    backend.strategy(),
                    backend.timeout().as_duration()
                );
            }
            info!("  Output: {}", config.output.format);
        }

        Commands::Generate {
            source,
            target,
            format,
            label,
            eager,
            workers,
            summary,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(format) = format {
                config.output.format = format;
            }
            if let Some(label) = label {
                config.labels.kind = label;
            }
            if let Some(workers) = workers {
                config.generation.workers = workers;
            }
            if eager {
                config.generation.lazy = false;
            }

            let labeler = Labeler::from_config(&config).context("Invalid backend configuration")?;
            let engine = Arc::new(CommandEngine::from_config(&config.engine));
            let options = GenerationOptions {
                show_progress: true,
                ..GenerationOptions::from_config(&config.generation)
            };

            let started_at = Utc::now();
            let kind = config.output.format;
            let stats = if kind.is_predicate_family() {
                let format = predicate_format(kind, labeler.backend_names())?;
                Generator::<_, PredicateSamples>::new(engine, labeler, format, options)
                    .run(&source, &target)
                    .await
            } else {
                let format = feature_format(kind, &config.output)?;
                Generator::<_, NumericSamples>::new(engine, labeler, format, options)
                    .run(&source, &target)
                    .await
            }
            .context("Generation failed")?;

            finish("generate", "Generation Complete", started_at, stats, summary.as_deref())?;
            println!("Output:            {target:?}");
        }

        Commands::Migrate {
            source,
            source_format,
            target,
            target_format,
            backend_names,
            workers,
            label_columns,
            summary,
        } => {
            let config = load_config_or_default(&cli.config, label_columns)?;
            let backend_names = match backend_names {
                Some(names) => names,
                None if config.backends.is_empty() => Vec::new(),
                None => Labeler::from_config(&config)
                    .context("Invalid backend configuration")?
                    .backend_names(),
            };
            let options = MigrationOptions {
                workers: workers.unwrap_or(config.generation.workers),
                backend_names,
                output: config.output.clone(),
                show_progress: true,
            };

            let started_at = Utc::now();
            let stats = migrate_corpus(source_format, &source, &target, target_format, &options)
                .await
                .with_context(|| {
                    format!(
                        "Failed to migrate {source:?} ({source_format}) to {target:?} \
                         ({target_format})"
                    )
                })?;

            finish("migrate", "Migration Complete", started_at, stats, summary.as_deref())?;
        }

        Commands::Split {
            input,
            format,
            ratio,
            seed,
            first,
            second,
            label_columns,
        } => {
            let config = load_config_or_default(&cli.config, label_columns)?;
            let seed = seed.unwrap_or(config.generation.split_seed);
            let (a, b) = if format.is_predicate_family() {
                let names = if config.backends.is_empty() {
                    Vec::new()
                } else {
                    Labeler::from_config(&config)?.backend_names()
                };
                let codec = predicate_format(format, names)?;
                split_file(&*codec, &input, ratio, seed, &first, &second)
            } else {
                let codec = feature_format(format, &config.output)?;
                split_file(&*codec, &input, ratio, seed, &first, &second)
            }
            .with_context(|| format!("Failed to split {input:?}"))?;

            println!("\n=== Split Complete ===");
            println!("First:   {} samples in {first:?}", a.samples_written);
            println!("Second:  {} samples in {second:?}", b.samples_written);
            println!("Dropped: {}", a.samples_failed + b.samples_failed);
        }

        Commands::Trim {
            input,
            format,
            max,
            target,
            label_columns,
        } => {
            let config = load_config_or_default(&cli.config, label_columns)?;
            let stats = if format.is_predicate_family() {
                let codec = predicate_format(format, Vec::new())?;
                trim_file(&*codec, &input, max, &target)
            } else {
                let codec = feature_format(format, &config.output)?;
                trim_file(&*codec, &input, max, &target)
            }
            .with_context(|| format!("Failed to trim {input:?}"))?;

            println!("\n=== Trim Complete ===");
            println!("Kept:    {} samples in {target:?}", stats.samples_written);
            println!("Dropped: {}", stats.samples_failed);
        }
    }

    Ok(())
}
