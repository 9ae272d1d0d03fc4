//! Text Eval CLI
//!
//! Scores precomputed predictions against references with a YAML-configured
//! set of metrics.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use text_eval::{
    build_comparison, EvalConfig, EvaluationData, EvaluationPipeline, MetricKind,
    PrecomputedModel, SimpleEvaluationPipeline,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "text-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one or more prediction files and compare them
    Evaluate {
        /// Metric configuration (YAML); accuracy only when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data files with predictions and references (JSON), one pipeline each
        #[arg(long, required = true)]
        data: Vec<PathBuf>,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List metric kinds accepted in configuration files
    Metrics,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let outcome = match cli.command {
        Commands::Evaluate {
            config,
            data,
            format,
        } => evaluate(config.as_deref(), &data, format),
        Commands::Metrics => {
            list_metrics();
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn evaluate(config: Option<&Path>, data: &[PathBuf], format: OutputFormat) -> Result<()> {
    let config = match config {
        Some(path) => EvalConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EvalConfig::default(),
    };
    tracing::info!(
        metrics = config.metrics.len(),
        files = data.len(),
        "Starting evaluation"
    );

    let datasets = data
        .iter()
        .map(|path| {
            EvaluationData::load(path)
                .with_context(|| format!("Failed to load data {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let Some(first) = datasets.first() else {
        bail!("No data files given");
    };
    let references = first.references.clone();
    let inputs = first.inputs.clone();
    if datasets.iter().any(|d| d.references != references) {
        bail!("Data files disagree on references");
    }

    let mut pipelines = Vec::with_capacity(datasets.len());
    for (path, dataset) in data.iter().zip(datasets) {
        let name = dataset.name.unwrap_or_else(|| file_stem(path));
        let evaluator = config
            .build_evaluator()
            .context("Failed to build evaluator")?;
        pipelines.push(
            SimpleEvaluationPipeline::single(PrecomputedModel::new(dataset.predictions), evaluator)
                .with_name(name),
        );
    }
    let pipelines: Vec<&dyn EvaluationPipeline> = pipelines
        .iter()
        .map(|p| p as &dyn EvaluationPipeline)
        .collect();

    let comparison = build_comparison(&pipelines, &inputs, &references)?;
    let rendered = match format {
        OutputFormat::Text => comparison.to_text(),
        OutputFormat::Markdown => comparison.to_markdown(),
        OutputFormat::Json => comparison.to_json()?,
    };
    println!("{rendered}");
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned())
}

fn list_metrics() {
    println!("Available Metrics");
    println!("=================");
    for kind in MetricKind::ALL {
        println!(
            "  {:<18} {:<15} {}",
            kind.as_str(),
            kind.domain().to_string(),
            kind.description()
        );
    }
}
