//! Runs a set of metrics over the same batch and collects their results.

use crate::classification::ConfusionMatrix;
use crate::error::{EvalError, Result};
use crate::metric::{ComputeOptions, Metric};
use crate::structures::{Instance, MetricResult};
use crate::text_metrics::{
    AccuracyMetric, ExactMatchMetric, F1Metric, PrecisionMetric, RecallMetric,
};
use std::collections::BTreeMap;
use std::fmt;

/// Metric name to result, one entry per registered metric
pub type EvaluationOutput = BTreeMap<String, MetricResult>;

/// Owns a list of metrics with unique names
pub struct Evaluator {
    metrics: Vec<Box<dyn Metric>>,
}

impl Evaluator {
    /// Evaluator over `metrics`; an empty list yields a single accuracy metric.
    ///
    /// # Errors
    ///
    /// Returns a registration error for empty or duplicate metric names.
    pub fn new(metrics: Vec<Box<dyn Metric>>) -> Result<Self> {
        let mut evaluator = Self {
            metrics: Vec::with_capacity(metrics.len().max(1)),
        };
        if metrics.is_empty() {
            evaluator.add_metric(Box::new(AccuracyMetric::new()))?;
        }
        for metric in metrics {
            evaluator.add_metric(metric)?;
        }
        Ok(evaluator)
    }

    /// Start a chained construction
    #[must_use]
    pub fn builder() -> EvaluatorBuilder {
        EvaluatorBuilder::default()
    }

    /// Accuracy, exact match and token F1
    ///
    /// # Errors
    ///
    /// Never fails in practice; registration is checked like any other.
    pub fn question_answering() -> Result<Self> {
        Self::builder()
            .add_metric(Box::new(AccuracyMetric::new()))?
            .add_metric(Box::new(ExactMatchMetric::new()))?
            .add_metric(Box::new(F1Metric::new()))?
            .build()
    }

    /// Accuracy, F1, precision, recall and the confusion matrix
    ///
    /// # Errors
    ///
    /// Never fails in practice; registration is checked like any other.
    pub fn text_classification() -> Result<Self> {
        Self::builder()
            .add_metric(Box::new(AccuracyMetric::new()))?
            .add_metric(Box::new(F1Metric::new()))?
            .add_metric(Box::new(PrecisionMetric::new()))?
            .add_metric(Box::new(RecallMetric::new()))?
            .add_metric(Box::new(ConfusionMatrix::new()))?
            .build()
    }

    /// Register one more metric
    ///
    /// # Errors
    ///
    /// Returns a registration error for an empty or already registered name.
    pub fn add_metric(&mut self, metric: Box<dyn Metric>) -> Result<&mut Self> {
        check_registration(&self.metrics, metric.as_ref())?;
        self.metrics.push(metric);
        Ok(self)
    }

    /// Registered metrics, in registration order
    #[must_use]
    pub fn metrics(&self) -> &[Box<dyn Metric>] {
        &self.metrics
    }

    /// Metric names, in registration order
    #[must_use]
    pub fn metric_names(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.name()).collect()
    }

    /// Run every metric on the same input.
    ///
    /// # Errors
    ///
    /// The first metric failure aborts the evaluation.
    pub fn evaluate(
        &self,
        predictions: &Instance,
        references: &Instance,
        options: &ComputeOptions,
    ) -> Result<EvaluationOutput> {
        let mut output = EvaluationOutput::new();
        for metric in &self.metrics {
            tracing::debug!(metric = metric.name(), domain = %metric.domain(), "Running metric");
            let result = metric.call(predictions, references, options)?;
            output.insert(metric.name().to_string(), result);
        }
        Ok(output)
    }

    /// Alias of [`Evaluator::evaluate`]
    ///
    /// # Errors
    ///
    /// See [`Evaluator::evaluate`].
    pub fn call(
        &self,
        predictions: &Instance,
        references: &Instance,
        options: &ComputeOptions,
    ) -> Result<EvaluationOutput> {
        self.evaluate(predictions, references, options)
    }
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Evaluator [{}]", self.metric_names().join(", "))
    }
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("metrics", &self.metrics)
            .finish()
    }
}

fn check_registration(registered: &[Box<dyn Metric>], metric: &dyn Metric) -> Result<()> {
    let name = metric.name();
    if name.trim().is_empty() {
        return Err(EvalError::Registration(format!(
            "{} metric has an empty name",
            metric.domain()
        )));
    }
    if registered.iter().any(|m| m.name() == name) {
        return Err(EvalError::Registration(format!(
            "metric `{name}` is already registered"
        )));
    }
    Ok(())
}

/// Chained construction of an [`Evaluator`]
#[derive(Debug, Default)]
pub struct EvaluatorBuilder {
    metrics: Vec<Box<dyn Metric>>,
}

impl EvaluatorBuilder {
    /// # Errors
    ///
    /// Returns a registration error for an empty or already added name.
    pub fn add_metric(mut self, metric: Box<dyn Metric>) -> Result<Self> {
        check_registration(&self.metrics, metric.as_ref())?;
        self.metrics.push(metric);
        Ok(self)
    }

    /// Finish; with no metric added the default accuracy metric is used.
    ///
    /// # Errors
    ///
    /// See [`Evaluator::new`].
    pub fn build(self) -> Result<Evaluator> {
        Evaluator::new(self.metrics)
    }
}
