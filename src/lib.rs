//! # Text Eval
//!
//! Normalization and aggregation layer for NLP evaluation.
//!
//! Predictions and references arrive in many shapes: bare strings, integer
//! labels, mappings with a `value`/`text` key, records, and per-item lists of
//! alternatives. Every metric sees them through one canonical form and returns
//! a uniform [`MetricResult`].
//!
//! ## Architecture
//!
//! ```text
//! Model (ModelWrapper)
//!        ↓
//! Predictions + References (Instance)
//!        ↓
//! Normalizer → Canonical batch
//!        ↓
//! Flattener (metrics that need 1:1 pairs)
//!        ↓
//! Metric backends (text, classification, semantic, LLM judge)
//!        ↓
//! Evaluator → {metric name: MetricResult}
//!        ↓
//! Comparison report across pipelines
//! ```

pub mod classification;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod flatten;
pub mod judge;
pub mod metric;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod semantic;
pub mod structures;
pub mod text_metrics;

pub use classification::{confusion_matrix, ConfusionMatrix};
pub use config::{
    ConfigError, EvalConfig, JudgeConfig, MetricKind, MetricSettings, MetricSpec,
    NormalizationConfig, TruncationConfig,
};
pub use error::{EvalError, Result};
pub use evaluator::{EvaluationOutput, Evaluator, EvaluatorBuilder};
pub use flatten::{flatten_references, FlatPairs, Flattener, Head, SeededSample, TruncationStrategy};
pub use judge::{
    Aggregation, JudgeBackend, LlmJudgeMetric, OpenAiJudgeClient, DEFAULT_JUDGE_PROMPT,
};
pub use metric::{BackendMetric, ComputeOptions, Metric, MetricDomain, ScoringBackend};
pub use normalize::{normalize, Canonical, Normalizer};
pub use pipeline::{
    EvaluationData, EvaluationPipeline, ModelWrapper, PrecomputedModel, SimpleEvaluationPipeline,
};
pub use report::{build_comparison, Comparison, ComparisonRow, ComparisonTable, ReportMetadata};
pub use semantic::{cosine_similarity, EmbeddingBackend, SemanticSimilarity};
pub use structures::{
    Instance, MetricResult, PredictionRecord, PredictionRole, Record, ReferenceRecord,
    ReferenceRole,
};
pub use text_metrics::{
    AccuracyMetric, BleuMetric, ExactMatchMetric, F1Metric, MeteorMetric, PrecisionMetric,
    RecallMetric, RougeMetric,
};
