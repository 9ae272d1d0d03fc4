//! Embedding-based semantic similarity.
//!
//! The embedding model is an external collaborator reached through
//! [`EmbeddingBackend`]. Each prediction is compared with every candidate
//! reference of its item and keeps the closest one, so multi-reference items
//! need no flattening.

use crate::error::{EvalError, Result};
use crate::metric::{BackendMetric, ComputeOptions, Metric, MetricDomain, ScoringBackend};
use crate::normalize::Canonical;
use crate::structures::{Instance, MetricResult};
use serde_json::{json, Map, Value};

/// Text embedding model
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts, one vector per input in order.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Backend`] when the model fails.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier reported in results
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Cosine similarity; 0 for mismatched dimensions or zero vectors
#[must_use]
pub fn cosine_similarity(e1: &[f32], e2: &[f32]) -> f32 {
    if e1.len() != e2.len() {
        return 0.0;
    }

    let dot_product: f32 = e1.iter().zip(e2.iter()).map(|(a, b)| a * b).sum();
    let norm1: f32 = e1.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm2: f32 = e2.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm1 == 0.0 || norm2 == 0.0 {
        return 0.0;
    }

    dot_product / (norm1 * norm2)
}

struct EmbeddingScorer {
    embedder: Box<dyn EmbeddingBackend>,
    per_instance_score: bool,
}

impl ScoringBackend for EmbeddingScorer {
    #[allow(clippy::cast_precision_loss)]
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        options: &ComputeOptions,
    ) -> Result<Map<String, Value>> {
        let mut texts = Vec::new();
        let mut spans = Vec::with_capacity(predictions.len());
        for (index, (prediction, reference)) in predictions.iter().zip(references).enumerate() {
            let prediction = prediction.as_single().ok_or_else(|| {
                EvalError::shape(format!("item {index}: cannot handle multiple predictions"))
            })?;
            texts.push(prediction.to_string());
            let start = texts.len();
            texts.extend(reference.candidates().iter().cloned());
            spans.push((start - 1, start..texts.len()));
        }

        let vectors = self.embedder.embed(&texts)?;
        if vectors.len() != texts.len() {
            return Err(EvalError::backend(format!(
                "embedding model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        let per_item: Vec<f64> = spans
            .into_iter()
            .map(|(prediction, candidates)| {
                candidates
                    .map(|c| f64::from(cosine_similarity(&vectors[prediction], &vectors[c])))
                    .fold(0.0_f64, f64::max)
            })
            .collect();

        let mut out = Map::new();
        out.insert(
            "score".to_string(),
            json!(per_item.iter().sum::<f64>() / per_item.len().max(1) as f64),
        );
        out.insert("model".to_string(), json!(self.embedder.model_name()));
        if options.flag("per_instance_score", self.per_instance_score) {
            out.insert("per_instance".to_string(), json!(per_item));
        }
        Ok(out)
    }
}

/// Closest-reference cosine similarity of embeddings
#[derive(Debug)]
pub struct SemanticSimilarity(BackendMetric);

impl SemanticSimilarity {
    /// `per_instance_score` keeps per-item similarities under `extra["per_instance"]`
    pub fn new(embedder: impl EmbeddingBackend + 'static, per_instance_score: bool) -> Self {
        let scorer = EmbeddingScorer {
            embedder: Box::new(embedder),
            per_instance_score,
        };
        Self(BackendMetric::new(
            "SemanticSimilarity",
            MetricDomain::Semantic,
            scorer,
        ))
    }
}

impl Metric for SemanticSimilarity {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn domain(&self) -> MetricDomain {
        self.0.domain()
    }

    fn compute(
        &self,
        predictions: &Instance,
        references: &Instance,
        options: &ComputeOptions,
    ) -> Result<MetricResult> {
        self.0.compute(predictions, references, options)
    }
}
