//! YAML configuration for building evaluators.
//!
//! A config lists metrics either by name or as a mapping with a `kind` and
//! per-metric settings (currently only the LLM judge takes any).

use crate::classification::ConfusionMatrix;
use crate::error::EvalError;
use crate::evaluator::Evaluator;
use crate::flatten::SeededSample;
use crate::judge::{Aggregation, LlmJudgeMetric};
use crate::metric::{Metric, MetricDomain};
use crate::normalize::Normalizer;
use crate::text_metrics::{
    AccuracyMetric, BleuMetric, ExactMatchMetric, F1Metric, MeteorMetric, PrecisionMetric,
    RecallMetric, RougeMetric,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Metric cannot be built from configuration: {0}")]
    Unsupported(String),
}

impl From<ConfigError> for EvalError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Metrics that can be named in a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricKind {
    Accuracy,
    Precision,
    Recall,
    F1,
    ExactMatch,
    Bleu,
    Rouge,
    Meteor,
    ConfusionMatrix,
    /// Embedding similarity; needs a backend supplied in code
    Semantic,
    LlmJudge,
}

impl MetricKind {
    pub const ALL: [Self; 11] = [
        Self::Accuracy,
        Self::Precision,
        Self::Recall,
        Self::F1,
        Self::ExactMatch,
        Self::Bleu,
        Self::Rouge,
        Self::Meteor,
        Self::ConfusionMatrix,
        Self::Semantic,
        Self::LlmJudge,
    ];

    /// Canonical configuration name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1 => "f1",
            Self::ExactMatch => "exact_match",
            Self::Bleu => "bleu",
            Self::Rouge => "rouge",
            Self::Meteor => "meteor",
            Self::ConfusionMatrix => "confusion_matrix",
            Self::Semantic => "semantic",
            Self::LlmJudge => "llm_judge",
        }
    }

    #[must_use]
    pub const fn domain(self) -> MetricDomain {
        match self {
            Self::Accuracy | Self::Precision | Self::Recall | Self::F1 | Self::ExactMatch => {
                MetricDomain::Basic
            }
            Self::Bleu | Self::Rouge | Self::Meteor => MetricDomain::Text,
            Self::ConfusionMatrix => MetricDomain::Classification,
            Self::Semantic => MetricDomain::Semantic,
            Self::LlmJudge => MetricDomain::Judge,
        }
    }

    /// One-line description for listings
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Accuracy => "fraction of items whose prediction equals the reference",
            Self::Precision => "token precision against the best reference",
            Self::Recall => "token recall against the best reference",
            Self::F1 => "token F1 against the best reference",
            Self::ExactMatch => "exact string match over flattened pairs",
            Self::Bleu => "corpus BLEU-4 with brevity penalty",
            Self::Rouge => "ROUGE-1, ROUGE-2 and ROUGE-L F-measures",
            Self::Meteor => "unigram alignment score with fragmentation penalty",
            Self::ConfusionMatrix => "label confusion matrix over flattened pairs",
            Self::Semantic => "embedding cosine similarity (library use only)",
            Self::LlmJudge => "binary LLM judgments aggregated per pair",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ConfigError;

    /// Parse metric kind from string
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownMetric` if the string doesn't match a known metric.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accuracy" | "acc" => Ok(Self::Accuracy),
            "precision" => Ok(Self::Precision),
            "recall" => Ok(Self::Recall),
            "f1" | "f1_score" => Ok(Self::F1),
            "exact_match" | "exactmatch" | "em" => Ok(Self::ExactMatch),
            "bleu" => Ok(Self::Bleu),
            "rouge" | "rouge_l" | "rougel" | "rouge-l" => Ok(Self::Rouge),
            "meteor" => Ok(Self::Meteor),
            "confusion_matrix" | "confusion" => Ok(Self::ConfusionMatrix),
            "semantic" | "semantic_similarity" => Ok(Self::Semantic),
            "llm_judge" | "judge" => Ok(Self::LlmJudge),
            _ => Err(ConfigError::UnknownMetric(s.to_string())),
        }
    }
}

impl TryFrom<String> for MetricKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetricKind> for String {
    fn from(kind: MetricKind) -> Self {
        kind.as_str().to_string()
    }
}

/// How judge candidates are truncated when `max_n` is set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationConfig {
    #[default]
    Head,
    SeededSample { seed: u64 },
}

/// Settings of the LLM judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub model: Option<String>,
    pub api_base: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub n_tries: usize,
    pub temperature: f64,
    pub prompt: Option<String>,
    pub aggregation: Aggregation,
    pub max_n: Option<usize>,
    pub truncation: TruncationConfig,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: None,
            api_base: "http://localhost:11434".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            n_tries: 1,
            temperature: 0.0,
            prompt: None,
            aggregation: Aggregation::default(),
            max_n: None,
            truncation: TruncationConfig::default(),
        }
    }
}

impl JudgeConfig {
    /// Build the judge metric; the API key is read from `api_key_env` if set.
    ///
    /// # Errors
    ///
    /// Fails when `model` is missing, the prompt lacks a placeholder, or the
    /// HTTP client cannot be built.
    pub fn build(&self, normalizer: Normalizer) -> crate::error::Result<LlmJudgeMetric> {
        let model = self
            .model
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("llm_judge.model".to_string()))?;
        let api_key = std::env::var(&self.api_key_env).ok();

        let mut judge = LlmJudgeMetric::openai(model, &self.api_base, api_key, self.temperature)?
            .with_n_tries(self.n_tries)
            .with_aggregation(self.aggregation)
            .with_normalizer(normalizer)
            .with_max_n(self.max_n);
        if let TruncationConfig::SeededSample { seed } = self.truncation {
            judge = judge.with_truncation(SeededSample::new(seed));
        }
        if let Some(prompt) = &self.prompt {
            judge = judge.with_prompt(prompt.clone())?;
        }
        Ok(judge)
    }
}

/// Metric settings given as a mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSettings {
    pub kind: MetricKind,
    #[serde(flatten)]
    pub judge: JudgeConfig,
}

/// One entry of the `metrics` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricSpec {
    Name(MetricKind),
    Detailed(MetricSettings),
}

impl MetricSpec {
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Self::Name(kind) => *kind,
            Self::Detailed(settings) => settings.kind,
        }
    }

    /// Instantiate the metric.
    ///
    /// # Errors
    ///
    /// Semantic similarity is rejected since its embedding model cannot be
    /// described in YAML; judge construction errors are propagated.
    pub fn build(&self, normalizer: Normalizer) -> crate::error::Result<Box<dyn Metric>> {
        let metric: Box<dyn Metric> = match self.kind() {
            MetricKind::Accuracy => Box::new(AccuracyMetric::new().with_normalizer(normalizer)),
            MetricKind::Precision => Box::new(PrecisionMetric::new().with_normalizer(normalizer)),
            MetricKind::Recall => Box::new(RecallMetric::new().with_normalizer(normalizer)),
            MetricKind::F1 => Box::new(F1Metric::new().with_normalizer(normalizer)),
            MetricKind::ExactMatch => Box::new(ExactMatchMetric::new().with_normalizer(normalizer)),
            MetricKind::Bleu => Box::new(BleuMetric::new().with_normalizer(normalizer)),
            MetricKind::Rouge => Box::new(RougeMetric::new().with_normalizer(normalizer)),
            MetricKind::Meteor => Box::new(MeteorMetric::new().with_normalizer(normalizer)),
            MetricKind::ConfusionMatrix => {
                Box::new(ConfusionMatrix::new().with_normalizer(normalizer))
            }
            MetricKind::Semantic => {
                return Err(ConfigError::Unsupported(
                    "semantic similarity needs an embedding backend supplied in code".to_string(),
                )
                .into())
            }
            MetricKind::LlmJudge => {
                let judge = match self {
                    Self::Detailed(settings) => settings.judge.build(normalizer)?,
                    Self::Name(_) => {
                        return Err(ConfigError::MissingField("llm_judge.model".to_string()).into())
                    }
                };
                Box::new(judge)
            }
        };
        Ok(metric)
    }
}

/// Normalization section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Convert integer atoms to strings
    #[serde(default = "default_stringify")]
    pub stringify: bool,
}

const fn default_stringify() -> bool {
    true
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            stringify: default_stringify(),
        }
    }
}

impl NormalizationConfig {
    #[must_use]
    pub const fn normalizer(self) -> Normalizer {
        Normalizer::new().stringify(self.stringify)
    }
}

/// Evaluation configuration loaded from YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub normalization: NormalizationConfig,
    /// Metrics to run; empty means the default accuracy metric
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

impl EvalConfig {
    /// Load configuration from YAML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if YAML is invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Build the configured evaluator
    ///
    /// # Errors
    ///
    /// Returns configuration errors from metric construction and
    /// registration errors for duplicate metrics.
    pub fn build_evaluator(&self) -> crate::error::Result<Evaluator> {
        let normalizer = self.normalization.normalizer();
        let mut builder = Evaluator::builder();
        for spec in &self.metrics {
            builder = builder.add_metric(spec.build(normalizer)?)?;
        }
        builder.build()
    }
}
