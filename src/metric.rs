//! The metric contract and the generic backend-driven metric.
//!
//! A [`Metric`] turns a prediction batch and a reference batch into one
//! [`MetricResult`]. Most metrics share the same pipeline (normalize, check
//! lengths, optionally flatten, score, assemble) and only differ in their
//! [`ScoringBackend`]; [`BackendMetric`] implements that pipeline once.

use crate::error::{EvalError, Result};
use crate::flatten::flatten_references;
use crate::normalize::{Canonical, Normalizer};
use crate::structures::{Instance, MetricResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Category of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDomain {
    /// Task-agnostic label/string comparison
    Basic,
    /// N-gram based text generation metrics
    Text,
    /// Embedding similarity
    Semantic,
    /// Label distribution metrics
    Classification,
    /// LLM-as-judge
    Judge,
}

impl fmt::Display for MetricDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Basic => "basic",
            Self::Text => "text",
            Self::Semantic => "semantic",
            Self::Classification => "classification",
            Self::Judge => "judge",
        };
        write!(f, "{name}")
    }
}

/// Open key/value options forwarded to scoring backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputeOptions(Map<String, Value>);

impl ComputeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one option
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Boolean option, `default` when absent or not a boolean
    #[must_use]
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ComputeOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A scoring component.
///
/// Implementations must not keep per-call state: the same inputs always
/// produce the same result.
pub trait Metric: Send + Sync {
    /// Unique key under which the evaluator reports this metric
    fn name(&self) -> &str;

    fn domain(&self) -> MetricDomain;

    /// Score a batch.
    ///
    /// # Errors
    ///
    /// Returns a shape error for unsupported or misaligned inputs and a
    /// backend error when an external scorer fails.
    fn compute(
        &self,
        predictions: &Instance,
        references: &Instance,
        options: &ComputeOptions,
    ) -> Result<MetricResult>;

    /// Alias of [`Metric::compute`]
    ///
    /// # Errors
    ///
    /// See [`Metric::compute`].
    fn call(
        &self,
        predictions: &Instance,
        references: &Instance,
        options: &ComputeOptions,
    ) -> Result<MetricResult> {
        self.compute(predictions, references, options)
    }
}

impl fmt::Debug for dyn Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name())
            .field("domain", &self.domain())
            .finish()
    }
}

/// Black-box scorer over aligned, normalized batches.
///
/// Returns a mapping that holds either a `score` key or a composite of
/// numeric sub-scores. `empty_items` is read back when present.
pub trait ScoringBackend: Send + Sync {
    /// # Errors
    ///
    /// Implementations return [`EvalError::Backend`] on scorer failures and
    /// [`EvalError::Shape`] for cardinalities they cannot score.
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        options: &ComputeOptions,
    ) -> Result<Map<String, Value>>;
}

/// Check that two normalized batches are aligned
///
/// # Errors
///
/// Returns a shape error naming both lengths.
pub fn ensure_aligned(predictions: &[Canonical], references: &[Canonical]) -> Result<()> {
    if predictions.len() == references.len() {
        Ok(())
    } else {
        Err(EvalError::shape(format!(
            "{} predictions vs {} references",
            predictions.len(),
            references.len()
        )))
    }
}

/// Primary scalar of a backend mapping.
///
/// `score` wins; otherwise numeric values are averaged (composite metrics
/// such as ROUGE); otherwise the first nested mapping is searched.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn primary_score(output: &Map<String, Value>) -> Option<f64> {
    if let Some(score) = output.get("score").and_then(Value::as_f64) {
        return Some(score);
    }

    let numbers: Vec<f64> = output.values().filter_map(Value::as_f64).collect();
    if !numbers.is_empty() {
        return Some(numbers.iter().sum::<f64>() / numbers.len() as f64);
    }

    output
        .values()
        .filter_map(Value::as_object)
        .find_map(primary_score)
}

/// Metric that delegates scoring to a [`ScoringBackend`]
pub struct BackendMetric {
    name: String,
    domain: MetricDomain,
    backend: Box<dyn ScoringBackend>,
    flatten: bool,
    normalizer: Normalizer,
}

impl BackendMetric {
    pub fn new(
        name: impl Into<String>,
        domain: MetricDomain,
        backend: impl ScoringBackend + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            domain,
            backend: Box::new(backend),
            flatten: false,
            normalizer: Normalizer::new(),
        }
    }

    /// Flatten multi-reference items into pairs before scoring
    #[must_use]
    pub const fn flattened(mut self) -> Self {
        self.flatten = true;
        self
    }

    #[must_use]
    pub const fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    #[must_use]
    pub const fn is_flattened(&self) -> bool {
        self.flatten
    }
}

impl fmt::Debug for BackendMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendMetric")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("flatten", &self.flatten)
            .finish_non_exhaustive()
    }
}

impl Metric for BackendMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain(&self) -> MetricDomain {
        self.domain
    }

    fn compute(
        &self,
        predictions: &Instance,
        references: &Instance,
        options: &ComputeOptions,
    ) -> Result<MetricResult> {
        let mut predictions = self.normalizer.normalize(predictions)?;
        let mut references = self.normalizer.normalize(references)?;
        ensure_aligned(&predictions, &references)?;

        if predictions.is_empty() {
            return MetricResult::empty(&self.name);
        }

        if self.flatten {
            let flat = flatten_references(&predictions, &references)?;
            if flat.is_empty() {
                return MetricResult::empty(&self.name);
            }
            predictions = flat.predictions.into_iter().map(Canonical::Single).collect();
            references = flat.references.into_iter().map(Canonical::Single).collect();
        }

        let total_items = predictions.len();
        tracing::debug!(metric = %self.name, items = total_items, "Scoring batch");

        let mut output = self.backend.score(&predictions, &references, options)?;
        let empty_items = output
            .remove("empty_items")
            .and_then(|v| v.as_u64())
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        output.remove("total_items");

        let score = primary_score(&output).unwrap_or(f64::NAN);
        let mut result =
            MetricResult::with_empty_items(&self.name, score, total_items, empty_items)?
                .with_extras(output);
        if self.flatten {
            result = result.with_extra("flattened", true);
        }
        Ok(result)
    }
}

/// Declares a named metric wrapping a [`BackendMetric`]
macro_rules! backend_metric {
    ($(#[$meta:meta])* $metric:ident => $build:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $metric(crate::metric::BackendMetric);

        impl $metric {
            #[must_use]
            pub fn new() -> Self {
                Self($build)
            }

            /// Replace the normalizer applied to both sides
            #[must_use]
            pub fn with_normalizer(self, normalizer: crate::normalize::Normalizer) -> Self {
                Self(self.0.with_normalizer(normalizer))
            }
        }

        impl Default for $metric {
            fn default() -> Self {
                Self::new()
            }
        }

        impl crate::metric::Metric for $metric {
            fn name(&self) -> &str {
                self.0.name()
            }

            fn domain(&self) -> crate::metric::MetricDomain {
                self.0.domain()
            }

            fn compute(
                &self,
                predictions: &crate::structures::Instance,
                references: &crate::structures::Instance,
                options: &crate::metric::ComputeOptions,
            ) -> crate::error::Result<crate::structures::MetricResult> {
                self.0.compute(predictions, references, options)
            }
        }
    };
}

pub(crate) use backend_metric;
