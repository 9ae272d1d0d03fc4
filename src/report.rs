//! Comparison reports across evaluation pipelines.
//!
//! Runs every pipeline on the same inputs and references and lays the scores
//! out as a table: one row per metric, one column per pipeline. When a
//! pipeline reports the same metric name with different results the table
//! would be ambiguous, so the raw results are returned instead.

use crate::error::Result;
use crate::pipeline::EvaluationPipeline;
use crate::structures::{Instance, MetricResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as FmtWrite;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Framework version
    pub framework_version: String,
    /// Mean `total_items` over all collected results
    pub average_items: f64,
}

impl ReportMetadata {
    fn new(average_items: f64) -> Self {
        Self {
            generated_at: Utc::now(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            average_items,
        }
    }
}

/// Scores of one metric across pipelines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub metric: String,
    /// One cell per pipeline; `None` when the pipeline lacks the metric
    pub scores: Vec<Option<f64>>,
}

/// Metric x pipeline score table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonTable {
    pub metadata: ReportMetadata,
    /// Column names, in pipeline order
    pub pipelines: Vec<String>,
    /// Rows sorted by metric name
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    /// Score of `metric` for `pipeline`
    #[must_use]
    pub fn score(&self, metric: &str, pipeline: &str) -> Option<f64> {
        let column = self.pipelines.iter().position(|p| p == pipeline)?;
        self.rows
            .iter()
            .find(|row| row.metric == metric)
            .and_then(|row| row.scores.get(column).copied().flatten())
    }

    fn builder(&self) -> Builder {
        let mut builder = Builder::default();
        builder.push_record(
            std::iter::once("Metric".to_string()).chain(self.pipelines.iter().cloned()),
        );
        for row in &self.rows {
            builder.push_record(
                std::iter::once(row.metric.clone())
                    .chain(row.scores.iter().map(|s| format_cell(*s))),
            );
        }
        builder
    }
}

fn format_cell(score: Option<f64>) -> String {
    match score {
        Some(s) if s.is_finite() => format!("{s:.4}"),
        Some(_) => "n/a".to_string(),
        None => "-".to_string(),
    }
}

/// Outcome of [`build_comparison`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Comparison {
    Table(ComparisonTable),
    /// Pipeline name to its deduplicated results, sorted by metric name
    Fallback(BTreeMap<String, Vec<MetricResult>>),
}

impl Comparison {
    #[must_use]
    pub const fn as_table(&self) -> Option<&ComparisonTable> {
        match self {
            Self::Table(table) => Some(table),
            Self::Fallback(_) => None,
        }
    }

    /// Render as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        writeln!(output, "# Evaluation Comparison").ok();
        writeln!(output).ok();

        match self {
            Self::Table(table) => {
                writeln!(
                    output,
                    "**Generated:** {}",
                    table.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
                )
                .ok();
                writeln!(
                    output,
                    "**Framework Version:** {}",
                    table.metadata.framework_version
                )
                .ok();
                writeln!(
                    output,
                    "**Average Items:** {:.0}",
                    table.metadata.average_items
                )
                .ok();
                writeln!(output).ok();

                let mut rendered = table.builder().build();
                rendered.with(Style::markdown());
                writeln!(output, "{rendered}").ok();
            }
            Self::Fallback(results) => {
                for (pipeline, metrics) in results {
                    writeln!(output, "## {pipeline}").ok();
                    writeln!(output).ok();
                    for result in metrics {
                        writeln!(output, "- {result}").ok();
                    }
                    writeln!(output).ok();
                }
            }
        }

        output
    }

    /// Render as plain text table
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        writeln!(
            output,
            "═══════════════════════════════════════════════════════════════"
        )
        .ok();
        writeln!(output, "  Evaluation Comparison").ok();
        writeln!(
            output,
            "═══════════════════════════════════════════════════════════════"
        )
        .ok();

        match self {
            Self::Table(table) => {
                writeln!(
                    output,
                    "  Average items: {:.0}",
                    table.metadata.average_items
                )
                .ok();
                writeln!(output).ok();
                writeln!(output, "{}", table.builder().build()).ok();
            }
            Self::Fallback(results) => {
                for (pipeline, metrics) in results {
                    writeln!(output).ok();
                    writeln!(output, "{pipeline}").ok();
                    writeln!(
                        output,
                        "───────────────────────────────────────────────────────────────"
                    )
                    .ok();
                    for result in metrics {
                        writeln!(output, "  {result}").ok();
                    }
                }
            }
        }

        output
    }
}

/// Run every pipeline on the same data and compare their scores.
///
/// Pipelines without a name are called `eval-pipe-<index>`; a name already
/// taken by an earlier pipeline gets `-<index>` appended.
///
/// # Errors
///
/// Propagates the first pipeline failure.
#[allow(clippy::cast_precision_loss)]
pub fn build_comparison(
    pipelines: &[&dyn EvaluationPipeline],
    inputs: &[Value],
    references: &Instance,
) -> Result<Comparison> {
    let mut collected: Vec<(String, Vec<MetricResult>)> = Vec::with_capacity(pipelines.len());
    let mut item_counts = Vec::new();

    for (index, pipeline) in pipelines.iter().enumerate() {
        let mut name = pipeline
            .name()
            .map_or_else(|| format!("eval-pipe-{index}"), str::to_string);
        while collected.iter().any(|(taken, _)| *taken == name) {
            let renamed = format!("{name}-{index}");
            tracing::warn!(pipeline = %name, renamed = %renamed, "Duplicate pipeline name");
            name = renamed;
        }

        let unique: HashSet<MetricResult> = pipeline
            .run(inputs, references)?
            .into_iter()
            .flat_map(BTreeMap::into_values)
            .collect();
        item_counts.extend(unique.iter().map(MetricResult::total_items));

        let mut results: Vec<MetricResult> = unique.into_iter().collect();
        results.sort_by(|a, b| a.metric_name().cmp(b.metric_name()));
        collected.push((name, results));
    }

    let average_items = if item_counts.is_empty() {
        0.0
    } else {
        item_counts.iter().sum::<usize>() as f64 / item_counts.len() as f64
    };
    tracing::info!(
        average_items = format!("{average_items:.0}"),
        pipelines = collected.len(),
        "Items evaluated on average"
    );

    let ambiguous = collected.iter().find(|(_, results)| {
        results
            .windows(2)
            .any(|w| w[0].metric_name() == w[1].metric_name())
    });
    if let Some((pipeline, _)) = ambiguous {
        tracing::warn!(
            pipeline = %pipeline,
            "Metric reported twice with different results; falling back to raw results"
        );
        return Ok(Comparison::Fallback(collected.into_iter().collect()));
    }

    let metrics: BTreeSet<&str> = collected
        .iter()
        .flat_map(|(_, results)| results.iter().map(MetricResult::metric_name))
        .collect();

    let rows = metrics
        .into_iter()
        .map(|metric| ComparisonRow {
            metric: metric.to_string(),
            scores: collected
                .iter()
                .map(|(_, results)| {
                    results
                        .iter()
                        .find(|r| r.metric_name() == metric)
                        .map(MetricResult::score)
                })
                .collect(),
        })
        .collect();

    Ok(Comparison::Table(ComparisonTable {
        metadata: ReportMetadata::new(average_items),
        pipelines: collected.iter().map(|(name, _)| name.clone()).collect(),
        rows,
    }))
}
