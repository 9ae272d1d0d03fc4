//! Evaluation pipelines: a model wrapper feeding one or more evaluators.
//!
//! The model itself is an external collaborator behind [`ModelWrapper`]; this
//! module only wires its predictions into [`Evaluator`]s.

use crate::error::Result;
use crate::evaluator::{EvaluationOutput, Evaluator};
use crate::metric::ComputeOptions;
use crate::structures::Instance;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Produces predictions for a batch of raw inputs
pub trait ModelWrapper: Send + Sync {
    /// # Errors
    ///
    /// Returns [`crate::EvalError::Backend`] when inference fails.
    fn predict(&self, inputs: &[Value]) -> Result<Instance>;
}

/// Anything that turns inputs and references into evaluation outputs
pub trait EvaluationPipeline {
    /// Display name used in comparison reports
    fn name(&self) -> Option<&str> {
        None
    }

    /// Run the pipeline, one output per evaluator.
    ///
    /// # Errors
    ///
    /// Propagates model and metric failures.
    fn run(&self, inputs: &[Value], references: &Instance) -> Result<Vec<EvaluationOutput>>;
}

/// Predictions computed ahead of time, e.g. loaded from a file
#[derive(Debug, Clone)]
pub struct PrecomputedModel {
    predictions: Instance,
}

impl PrecomputedModel {
    #[must_use]
    pub const fn new(predictions: Instance) -> Self {
        Self { predictions }
    }
}

impl ModelWrapper for PrecomputedModel {
    fn predict(&self, _inputs: &[Value]) -> Result<Instance> {
        Ok(self.predictions.clone())
    }
}

/// Batch of precomputed predictions read from a JSON file
///
/// ```json
/// {"name": "baseline", "inputs": [], "predictions": ["a"], "references": [["a", "b"]]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EvaluationData {
    /// Pipeline name in comparison reports
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<Value>,
    pub predictions: Instance,
    pub references: Instance,
}

impl EvaluationData {
    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read and a JSON error if it
    /// does not describe valid instances.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// One model, several evaluators
pub struct SimpleEvaluationPipeline {
    model: Box<dyn ModelWrapper>,
    evaluators: Vec<Evaluator>,
    name: Option<String>,
    options: ComputeOptions,
}

impl SimpleEvaluationPipeline {
    pub fn new(model: impl ModelWrapper + 'static, evaluators: Vec<Evaluator>) -> Self {
        Self {
            model: Box::new(model),
            evaluators,
            name: None,
            options: ComputeOptions::new(),
        }
    }

    /// Pipeline with a single evaluator
    pub fn single(model: impl ModelWrapper + 'static, evaluator: Evaluator) -> Self {
        Self::new(model, vec![evaluator])
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Options forwarded to every metric
    #[must_use]
    pub fn with_options(mut self, options: ComputeOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn evaluators(&self) -> &[Evaluator] {
        &self.evaluators
    }
}

impl EvaluationPipeline for SimpleEvaluationPipeline {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn run(&self, inputs: &[Value], references: &Instance) -> Result<Vec<EvaluationOutput>> {
        tracing::debug!(
            pipeline = self.name.as_deref().unwrap_or("unnamed"),
            inputs = inputs.len(),
            "Running model"
        );
        let predictions = self.model.predict(inputs)?;
        self.evaluators
            .iter()
            .map(|evaluator| evaluator.evaluate(&predictions, references, &self.options))
            .collect()
    }
}
