//! LLM-as-judge metric.
//!
//! Every flattened (prediction, reference) pair is rendered into a prompt and
//! sent `n_tries` times to a [`JudgeBackend`], which answers with a binary
//! verdict. Verdicts are aggregated per pair, and the pair scores are averaged.

use crate::error::{EvalError, Result};
use crate::flatten::{Flattener, TruncationStrategy};
use crate::metric::{ensure_aligned, ComputeOptions, Metric, MetricDomain};
use crate::normalize::Normalizer;
use crate::structures::{Instance, MetricResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Binary classifier prompt used when none is configured
pub const DEFAULT_JUDGE_PROMPT: &str = "You are a very good binary classifier. \
Classify the quality of prediction based on the provided reference.\n\
Prediction: {prediction}\n\
Reference: {reference}";

const PREDICTION_PLACEHOLDER: &str = "{prediction}";
const REFERENCE_PLACEHOLDER: &str = "{reference}";

/// How the verdicts of one pair are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Mean,
    Average,
    Max,
}

impl Aggregation {
    /// Mean (rounded to 4 decimals) or max of the verdicts; 0.0 when empty
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate(self, scores: &[u8]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        match self {
            Self::Mean | Self::Average => {
                let mean = scores.iter().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64;
                (mean * 10_000.0).round() / 10_000.0
            }
            Self::Max => scores.iter().copied().max().map_or(0.0, f64::from),
        }
    }
}

impl FromStr for Aggregation {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "average" | "avg" => Ok(Self::Average),
            "max" => Ok(Self::Max),
            other => Err(EvalError::configuration(format!(
                "unknown aggregation `{other}` (expected mean, average or max)"
            ))),
        }
    }
}

/// Binary judgment endpoint
pub trait JudgeBackend: Send + Sync {
    /// Verdict for one rendered prompt: 0 or 1.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Backend`] on transport failures or malformed replies.
    fn classify(&self, prompt: &str) -> Result<u8>;

    /// Model identifier reported in results
    fn model(&self) -> &str;
}

/// Strip the `ollama/` routing prefix from a model name
#[must_use]
pub fn clean_model_name(model: &str) -> &str {
    model.strip_prefix("ollama/").unwrap_or(model)
}

/// Ensure an OpenAI-compatible base URL ends with `/v1`
#[must_use]
pub fn clean_api_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

/// Read a verdict from a completion: first non-blank character must be 0 or 1
///
/// # Errors
///
/// Returns a backend error for any other reply.
pub fn parse_judgment(content: &str) -> Result<u8> {
    match content.trim_start().chars().next() {
        Some('0') => Ok(0),
        Some('1') => Ok(1),
        _ => Err(EvalError::backend(format!(
            "judge reply is not a binary verdict: {content:?}"
        ))),
    }
}

/// Blocking client for an OpenAI-compatible chat completions endpoint
pub struct OpenAiJudgeClient {
    client: reqwest::blocking::Client,
    model: String,
    api_base: String,
    api_key: Option<String>,
    temperature: f64,
}

impl OpenAiJudgeClient {
    /// # Errors
    ///
    /// Returns a backend error if the HTTP client cannot be built.
    pub fn new(model: &str, api_base: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EvalError::backend(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            model: clean_model_name(model).to_string(),
            api_base: clean_api_base(api_base),
            api_key,
            temperature: 0.0,
        })
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    #[must_use]
    pub const fn temperature(&self) -> f64 {
        self.temperature
    }
}

impl fmt::Debug for OpenAiJudgeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiJudgeClient")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl JudgeBackend for OpenAiJudgeClient {
    fn classify(&self, prompt: &str) -> Result<u8> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": 1,
            "messages": [{"role": "user", "content": prompt}],
        });

        let url = format!("{}/chat/completions", self.api_base);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| EvalError::backend(format!("judge request failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| EvalError::backend(format!("cannot read judge response: {e}")))?;
        if !status.is_success() {
            return Err(EvalError::backend(format!("judge API error ({status}): {text}")));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| EvalError::backend(format!("cannot parse judge response: {e}")))?;
        let content = json["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| {
                EvalError::backend(format!("unexpected judge response format: {json}"))
            })?;

        parse_judgment(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Substitute both placeholders in a single pass
fn render_prompt(template: &str, prediction: &str, reference: &str) -> String {
    template
        .split(PREDICTION_PLACEHOLDER)
        .map(|part| part.replace(REFERENCE_PLACEHOLDER, reference))
        .collect::<Vec<_>>()
        .join(prediction)
}

/// LLM-as-judge metric
pub struct LlmJudgeMetric {
    backend: Box<dyn JudgeBackend>,
    n_tries: usize,
    prompt: String,
    aggregation: Aggregation,
    flattener: Flattener,
    normalizer: Normalizer,
}

impl LlmJudgeMetric {
    pub const NAME: &'static str = "LlmJudgeMetric";

    /// Judge with one try, mean aggregation, the default prompt and no truncation
    pub fn new(backend: impl JudgeBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            n_tries: 1,
            prompt: DEFAULT_JUDGE_PROMPT.to_string(),
            aggregation: Aggregation::default(),
            flattener: Flattener::judge(None),
            normalizer: Normalizer::new(),
        }
    }

    /// Judge over an OpenAI-compatible endpoint
    ///
    /// # Errors
    ///
    /// Returns a backend error if the HTTP client cannot be built.
    pub fn openai(
        model: &str,
        api_base: &str,
        api_key: Option<String>,
        temperature: f64,
    ) -> Result<Self> {
        let client =
            OpenAiJudgeClient::new(model, api_base, api_key)?.with_temperature(temperature);
        Ok(Self::new(client))
    }

    /// Judgments per pair; 0 is treated as 1
    #[must_use]
    pub fn with_n_tries(mut self, n_tries: usize) -> Self {
        self.n_tries = n_tries.max(1);
        self
    }

    /// Replace the prompt template
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either placeholder is missing.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Result<Self> {
        let prompt = prompt.into();
        if !prompt.contains(PREDICTION_PLACEHOLDER) || !prompt.contains(REFERENCE_PLACEHOLDER) {
            return Err(EvalError::configuration(
                "judge prompt must contain {prediction} and {reference} placeholders",
            ));
        }
        self.prompt = prompt;
        Ok(self)
    }

    #[must_use]
    pub const fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Bound the candidates judged per item; `None` or 0 disables truncation
    #[must_use]
    pub fn with_max_n(mut self, max_n: Option<usize>) -> Self {
        self.flattener = self.flattener.with_max_n(max_n);
        if let Some(max_n) = self.flattener.max_n() {
            tracing::warn!(
                max_n,
                "Predictions/references per item will be truncated to max_n"
            );
        }
        self
    }

    #[must_use]
    pub fn with_truncation(mut self, truncation: impl TruncationStrategy + 'static) -> Self {
        self.flattener = self.flattener.with_truncation(truncation);
        self
    }

    #[must_use]
    pub const fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    #[must_use]
    pub const fn n_tries(&self) -> usize {
        self.n_tries
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub const fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.backend.model()
    }

    fn judge_pair(&self, prompt: &str) -> Result<Vec<u8>> {
        (0..self.n_tries)
            .map(|_| match self.backend.classify(prompt)? {
                verdict @ (0 | 1) => Ok(verdict),
                other => Err(EvalError::backend(format!(
                    "judge verdict must be 0 or 1, got {other}"
                ))),
            })
            .collect()
    }
}

impl fmt::Debug for LlmJudgeMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmJudgeMetric")
            .field("model", &self.backend.model())
            .field("n_tries", &self.n_tries)
            .field("aggregation", &self.aggregation)
            .field("flattener", &self.flattener)
            .finish_non_exhaustive()
    }
}

impl Metric for LlmJudgeMetric {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn domain(&self) -> MetricDomain {
        MetricDomain::Judge
    }

    #[allow(clippy::cast_precision_loss)]
    fn compute(
        &self,
        predictions: &Instance,
        references: &Instance,
        _options: &ComputeOptions,
    ) -> Result<MetricResult> {
        let predictions = self.normalizer.normalize(predictions)?;
        let references = self.normalizer.normalize(references)?;
        ensure_aligned(&predictions, &references)?;
        if predictions.is_empty() {
            return MetricResult::empty(Self::NAME);
        }

        let flat = self.flattener.flatten(&predictions, &references)?;
        tracing::debug!(pairs = flat.len(), model = %self.model(), "Judging predictions");

        let mut raw_scores = Vec::with_capacity(flat.len());
        let mut aggregated = Vec::with_capacity(flat.len());
        for (prediction, reference) in flat.predictions.iter().zip(&flat.references) {
            let prompt = render_prompt(&self.prompt, prediction, reference);
            tracing::debug!(prompt = %prompt, "Judge prompt");

            let scores = self.judge_pair(&prompt)?;
            let score = self.aggregation.aggregate(&scores);
            tracing::debug!(?scores, aggregated = score, "Judge verdicts");

            raw_scores.push(scores);
            aggregated.push(score);
        }

        let score = if aggregated.is_empty() {
            f64::NAN
        } else {
            aggregated.iter().sum::<f64>() / aggregated.len() as f64
        };

        Ok(MetricResult::new(Self::NAME, score, flat.len())?
            .with_extra("scores", json!(raw_scores))
            .with_extra("aggregated", json!(aggregated))
            .with_extra("model", self.model())
            .with_extra("flattened", true))
    }
}
