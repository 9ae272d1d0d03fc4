//! String metrics scored natively: label accuracy, token overlap, exact match,
//! BLEU, ROUGE and METEOR.
//!
//! Every backend receives normalized, aligned batches. Items with several
//! references are scored against their best reference unless the metric
//! flattens them first.

use crate::error::{EvalError, Result};
use crate::metric::{backend_metric, BackendMetric, ComputeOptions, MetricDomain, ScoringBackend};
use crate::normalize::Canonical;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Lowercased tokens split on whitespace and ASCII punctuation
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn prediction_atom(index: usize, prediction: &Canonical) -> Result<&str> {
    prediction.as_single().ok_or_else(|| {
        EvalError::shape(format!("item {index}: cannot handle multiple predictions"))
    })
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn f_measure(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

/// Best per-item score across references, averaged over the batch
fn best_reference_mean<F>(
    predictions: &[Canonical],
    references: &[Canonical],
    score: F,
) -> Result<(f64, usize)>
where
    F: Fn(&str, &str) -> f64,
{
    let mut per_item = Vec::with_capacity(predictions.len());
    let mut empty_items = 0;
    for (index, (prediction, reference)) in predictions.iter().zip(references).enumerate() {
        let prediction = prediction_atom(index, prediction)?;
        if prediction.trim().is_empty() {
            empty_items += 1;
        }
        let best = reference
            .candidates()
            .iter()
            .map(|r| score(prediction, r))
            .fold(0.0_f64, f64::max);
        per_item.push(best);
    }
    Ok((mean(&per_item), empty_items))
}

fn scored(score: f64, empty_items: usize) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("score".to_string(), json!(score));
    out.insert("empty_items".to_string(), json!(empty_items));
    out
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

fn overlap(left: &HashMap<&[String], usize>, right: &HashMap<&[String], usize>) -> usize {
    left.iter()
        .map(|(gram, count)| (*count).min(right.get(*gram).copied().unwrap_or(0)))
        .sum()
}

// =============================================================================
// Label / token overlap
// =============================================================================

/// Prediction equals one of the references after trimming
#[derive(Debug, Clone, Copy, Default)]
pub struct Accuracy;

impl ScoringBackend for Accuracy {
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        _options: &ComputeOptions,
    ) -> Result<Map<String, Value>> {
        let (score, empty_items) = best_reference_mean(predictions, references, |p, r| {
            if p.trim() == r.trim() {
                1.0
            } else {
                0.0
            }
        })?;
        Ok(scored(score, empty_items))
    }
}

/// Which ratio of the token overlap to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapMeasure {
    Precision,
    Recall,
    F1,
}

/// Bag-of-tokens overlap between prediction and reference
#[derive(Debug, Clone, Copy)]
pub struct TokenOverlap {
    measure: OverlapMeasure,
}

impl TokenOverlap {
    #[must_use]
    pub const fn new(measure: OverlapMeasure) -> Self {
        Self { measure }
    }

    /// Overlap ratio of one pair; two empty token lists match perfectly
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pair_score(&self, prediction: &str, reference: &str) -> f64 {
        let pred = tokenize(prediction);
        let gold = tokenize(reference);
        if pred.is_empty() && gold.is_empty() {
            return 1.0;
        }
        if pred.is_empty() || gold.is_empty() {
            return 0.0;
        }

        let common = overlap(&ngram_counts(&pred, 1), &ngram_counts(&gold, 1));
        let precision = common as f64 / pred.len() as f64;
        let recall = common as f64 / gold.len() as f64;
        match self.measure {
            OverlapMeasure::Precision => precision,
            OverlapMeasure::Recall => recall,
            OverlapMeasure::F1 => f_measure(precision, recall),
        }
    }
}

impl ScoringBackend for TokenOverlap {
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        _options: &ComputeOptions,
    ) -> Result<Map<String, Value>> {
        let (score, empty_items) =
            best_reference_mean(predictions, references, |p, r| self.pair_score(p, r))?;
        Ok(scored(score, empty_items))
    }
}

/// Exact string equality of flattened pairs
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl ScoringBackend for ExactMatch {
    #[allow(clippy::cast_precision_loss)]
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        _options: &ComputeOptions,
    ) -> Result<Map<String, Value>> {
        let mut matches = 0_usize;
        for (index, (prediction, reference)) in predictions.iter().zip(references).enumerate() {
            let prediction = prediction_atom(index, prediction)?;
            if reference.candidates().iter().any(|r| r == prediction) {
                matches += 1;
            }
        }
        let mut out = Map::new();
        out.insert(
            "score".to_string(),
            json!(matches as f64 / predictions.len().max(1) as f64),
        );
        out.insert("matches".to_string(), json!(matches));
        Ok(out)
    }
}

// =============================================================================
// BLEU
// =============================================================================

const BLEU_MAX_ORDER: usize = 4;

/// Corpus BLEU-4 with clipped counts over all references
#[derive(Debug, Clone, Copy, Default)]
pub struct Bleu;

impl ScoringBackend for Bleu {
    #[allow(clippy::cast_precision_loss)]
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        _options: &ComputeOptions,
    ) -> Result<Map<String, Value>> {
        let mut clipped = [0_usize; BLEU_MAX_ORDER];
        let mut totals = [0_usize; BLEU_MAX_ORDER];
        let mut hypothesis_length = 0_usize;
        let mut reference_length = 0_usize;

        for (index, (prediction, reference)) in predictions.iter().zip(references).enumerate() {
            let hyp = tokenize(prediction_atom(index, prediction)?);
            let refs: Vec<Vec<String>> =
                reference.candidates().iter().map(|r| tokenize(r)).collect();

            hypothesis_length += hyp.len();
            reference_length += closest_length(hyp.len(), &refs);

            for order in 1..=BLEU_MAX_ORDER {
                let hyp_counts = ngram_counts(&hyp, order);
                let mut max_ref: HashMap<&[String], usize> = HashMap::new();
                for r in &refs {
                    for (gram, count) in ngram_counts(r, order) {
                        let slot = max_ref.entry(gram).or_insert(0);
                        *slot = (*slot).max(count);
                    }
                }
                clipped[order - 1] += overlap(&hyp_counts, &max_ref);
                totals[order - 1] += hyp.len().saturating_sub(order - 1);
            }
        }

        let precisions: Vec<f64> = clipped
            .iter()
            .zip(&totals)
            .map(|(c, t)| if *t == 0 { 0.0 } else { *c as f64 / *t as f64 })
            .collect();

        let geometric_mean = if precisions.iter().any(|p| *p <= 0.0) {
            0.0
        } else {
            (precisions.iter().map(|p| p.ln()).sum::<f64>() / BLEU_MAX_ORDER as f64).exp()
        };

        let brevity_penalty = if hypothesis_length == 0 {
            0.0
        } else if hypothesis_length > reference_length {
            1.0
        } else {
            (1.0 - reference_length as f64 / hypothesis_length as f64).exp()
        };

        let mut out = Map::new();
        out.insert("score".to_string(), json!(geometric_mean * brevity_penalty));
        out.insert("precisions".to_string(), json!(precisions));
        out.insert("brevity_penalty".to_string(), json!(brevity_penalty));
        out.insert("translation_length".to_string(), json!(hypothesis_length));
        out.insert("reference_length".to_string(), json!(reference_length));
        Ok(out)
    }
}

/// Reference length closest to the hypothesis, shorter on ties
fn closest_length(hypothesis: usize, references: &[Vec<String>]) -> usize {
    references
        .iter()
        .map(Vec::len)
        .min_by_key(|len| (len.abs_diff(hypothesis), *len))
        .unwrap_or(0)
}

// =============================================================================
// ROUGE
// =============================================================================

fn rouge_n(pred: &[String], gold: &[String], n: usize) -> f64 {
    let pred_counts = ngram_counts(pred, n);
    let gold_counts = ngram_counts(gold, n);
    let pred_total: usize = pred_counts.values().sum();
    let gold_total: usize = gold_counts.values().sum();
    if pred_total == 0 || gold_total == 0 {
        return 0.0;
    }
    let common = overlap(&pred_counts, &gold_counts);
    ratio_f_measure(common, pred_total, gold_total)
}

fn rouge_l(pred: &[String], gold: &[String]) -> f64 {
    if pred.is_empty() || gold.is_empty() {
        return 0.0;
    }
    ratio_f_measure(lcs_length(pred, gold), pred.len(), gold.len())
}

#[allow(clippy::cast_precision_loss)]
fn ratio_f_measure(common: usize, pred_total: usize, gold_total: usize) -> f64 {
    f_measure(
        common as f64 / pred_total as f64,
        common as f64 / gold_total as f64,
    )
}

fn lcs_length(a: &[String], b: &[String]) -> usize {
    let mut previous = vec![0_usize; b.len() + 1];
    let mut current = vec![0_usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            current[j + 1] = if x == y {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// ROUGE-1, ROUGE-2 and ROUGE-L F-measures, best reference per item
#[derive(Debug, Clone, Copy, Default)]
pub struct Rouge;

impl ScoringBackend for Rouge {
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        _options: &ComputeOptions,
    ) -> Result<Map<String, Value>> {
        let mut rouge1 = Vec::with_capacity(predictions.len());
        let mut rouge2 = Vec::with_capacity(predictions.len());
        let mut rouge_lcs = Vec::with_capacity(predictions.len());

        for (index, (prediction, reference)) in predictions.iter().zip(references).enumerate() {
            let pred = tokenize(prediction_atom(index, prediction)?);
            let mut best = [0.0_f64; 3];
            for candidate in reference.candidates() {
                let gold = tokenize(candidate);
                best[0] = best[0].max(rouge_n(&pred, &gold, 1));
                best[1] = best[1].max(rouge_n(&pred, &gold, 2));
                best[2] = best[2].max(rouge_l(&pred, &gold));
            }
            rouge1.push(best[0]);
            rouge2.push(best[1]);
            rouge_lcs.push(best[2]);
        }

        let mut out = Map::new();
        out.insert(
            "rouge".to_string(),
            json!({
                "rouge1": mean(&rouge1),
                "rouge2": mean(&rouge2),
                "rougeL": mean(&rouge_lcs),
            }),
        );
        Ok(out)
    }
}

// =============================================================================
// METEOR
// =============================================================================

const METEOR_ALPHA: f64 = 0.9;
const METEOR_BETA: f64 = 3.0;
const METEOR_GAMMA: f64 = 0.5;

/// Exact-match METEOR of one pair
#[allow(clippy::cast_precision_loss)]
fn meteor_pair(prediction: &str, reference: &str) -> f64 {
    let pred = tokenize(prediction);
    let gold = tokenize(reference);

    let mut used = vec![false; gold.len()];
    let mut alignment = Vec::new();
    for (i, token) in pred.iter().enumerate() {
        if let Some(j) = (0..gold.len()).find(|j| !used[*j] && gold[*j] == *token) {
            used[j] = true;
            alignment.push((i, j));
        }
    }

    let matches = alignment.len();
    if matches == 0 {
        return 0.0;
    }

    let precision = matches as f64 / pred.len() as f64;
    let recall = matches as f64 / gold.len() as f64;
    let fmean = precision * recall / (METEOR_ALPHA * precision + (1.0 - METEOR_ALPHA) * recall);

    let chunks = 1 + alignment
        .windows(2)
        .filter(|w| !(w[1].0 == w[0].0 + 1 && w[1].1 == w[0].1 + 1))
        .count();
    let penalty = METEOR_GAMMA * (chunks as f64 / matches as f64).powf(METEOR_BETA);

    fmean * (1.0 - penalty)
}

/// Unigram METEOR with fragmentation penalty, best reference per item
#[derive(Debug, Clone, Copy, Default)]
pub struct Meteor;

impl ScoringBackend for Meteor {
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        _options: &ComputeOptions,
    ) -> Result<Map<String, Value>> {
        let (score, empty_items) = best_reference_mean(predictions, references, meteor_pair)?;
        Ok(scored(score, empty_items))
    }
}

// =============================================================================
// Named metrics
// =============================================================================

backend_metric! {
    /// Fraction of items whose prediction equals one of its references
    AccuracyMetric => BackendMetric::new("AccuracyMetric", MetricDomain::Basic, Accuracy)
}

backend_metric! {
    /// Token precision against the best reference
    PrecisionMetric => BackendMetric::new(
        "PrecisionMetric",
        MetricDomain::Basic,
        TokenOverlap::new(OverlapMeasure::Precision),
    )
}

backend_metric! {
    /// Token recall against the best reference
    RecallMetric => BackendMetric::new(
        "RecallMetric",
        MetricDomain::Basic,
        TokenOverlap::new(OverlapMeasure::Recall),
    )
}

backend_metric! {
    /// Token F1 against the best reference
    F1Metric => BackendMetric::new(
        "F1Metric",
        MetricDomain::Basic,
        TokenOverlap::new(OverlapMeasure::F1),
    )
}

backend_metric! {
    /// Exact match over flattened (prediction, reference) pairs
    ExactMatchMetric =>
        BackendMetric::new("ExactMatchMetric", MetricDomain::Basic, ExactMatch).flattened()
}

backend_metric! {
    BleuMetric => BackendMetric::new("BleuMetric", MetricDomain::Text, Bleu)
}

backend_metric! {
    /// Mean of ROUGE-1, ROUGE-2 and ROUGE-L; sub-scores under `extra["rouge"]`
    RougeMetric => BackendMetric::new("RougeMetric", MetricDomain::Text, Rouge)
}

backend_metric! {
    MeteorMetric => BackendMetric::new("MeteorMetric", MetricDomain::Text, Meteor)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::metric::Metric;
    use crate::structures::{Instance, MetricResult, PredictionRecord};
    use serde_json::json;

    fn run(metric: &dyn Metric, predictions: &Value, references: &Value) -> MetricResult {
        metric
            .compute(
                &Instance::try_from(predictions.clone()).unwrap(),
                &Instance::try_from(references.clone()).unwrap(),
                &ComputeOptions::new(),
            )
            .unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World!  it's"), vec!["hello", "world", "it", "s"]);
        assert!(tokenize(" ... ").is_empty());
    }

    // =========================================================================
    // Accuracy / overlap
    // =========================================================================

    #[test]
    fn test_accuracy_label_batch() {
        let result = run(
            &AccuracyMetric::new(),
            &json!(["A", "B", "C", "D", "B"]),
            &json!(["A", "B", "C", "D", "A"]),
        );
        assert_eq!(result.total_items(), 5);
        assert!(approx(result.score(), 0.8));
        assert!((0.0..=1.0).contains(&result.score()));
        assert_eq!(result.metric_name(), "AccuracyMetric");
    }

    #[test]
    fn test_accuracy_multi_reference() {
        let result = run(
            &AccuracyMetric::new(),
            &json!(["Paris", " berlin "]),
            &json!([["paris", "Paris"], ["Bonn", "berlin"]]),
        );
        assert!(approx(result.score(), 1.0));
        assert_eq!(result.total_items(), 2);
    }

    #[test]
    fn test_accuracy_accepts_records_and_labels() {
        let predictions = Instance::from(vec![
            PredictionRecord::new(1).with_score(0.9),
            PredictionRecord::new(0).with_score(0.4),
        ]);
        let references = Instance::from(vec![1_i64, 1_i64]);
        let result = AccuracyMetric::new()
            .compute(&predictions, &references, &ComputeOptions::new())
            .unwrap();
        assert!(approx(result.score(), 0.5));
    }

    #[test]
    fn test_accuracy_rejects_multiple_predictions() {
        let err = AccuracyMetric::new()
            .compute(
                &Instance::try_from(json!([["a", "b"]])).unwrap(),
                &Instance::try_from(json!(["a"])).unwrap(),
                &ComputeOptions::new(),
            )
            .unwrap_err();
        assert!(err.is_shape());
    }

    #[test]
    fn test_token_overlap_measures() {
        let pred = "the cat sat";
        let gold = "The cat sat on mat";
        assert!(approx(TokenOverlap::new(OverlapMeasure::Precision).pair_score(pred, gold), 1.0));
        assert!(approx(TokenOverlap::new(OverlapMeasure::Recall).pair_score(pred, gold), 0.6));
        assert!(approx(TokenOverlap::new(OverlapMeasure::F1).pair_score(pred, gold), 0.75));
        assert!(approx(TokenOverlap::new(OverlapMeasure::F1).pair_score("", ""), 1.0));
        assert!(approx(TokenOverlap::new(OverlapMeasure::F1).pair_score("x", ""), 0.0));
    }

    #[test]
    fn test_f1_best_reference_and_empty_items() {
        let result = run(
            &F1Metric::new(),
            &json!(["the cat sat", ""]),
            &json!([["a dog", "the cat sat"], "something"]),
        );
        assert!(approx(result.score(), 0.5));
        assert_eq!(result.empty_items(), 1);
        assert_eq!(result.total_items(), 2);
    }

    #[test]
    fn test_exact_match_flattens() {
        let result = run(
            &ExactMatchMetric::new(),
            &json!(["yes", "no"]),
            &json!([["yes", "Yes"], "no"]),
        );
        assert_eq!(result.total_items(), 3);
        assert!(approx(result.score(), 2.0 / 3.0));
        assert_eq!(result.extra()["flattened"], json!(true));
        assert_eq!(result.extra()["matches"], json!(2));
    }

    // =========================================================================
    // Generation metrics
    // =========================================================================

    #[test]
    fn test_empty_reference_list_is_not_dropped() {
        let predictions = Instance::try_from(json!(["a", "b"])).unwrap();
        let references = Instance::try_from(json!([[], "b"])).unwrap();
        let options = ComputeOptions::new();

        for metric in [
            &ExactMatchMetric::new() as &dyn Metric,
            &AccuracyMetric::new() as &dyn Metric,
        ] {
            let err = metric
                .compute(&predictions, &references, &options)
                .unwrap_err();
            assert!(err.is_shape());
        }

        let lone = Instance::try_from(json!([[]])).unwrap();
        let err = ExactMatchMetric::new()
            .compute(&Instance::try_from(json!(["a"])).unwrap(), &lone, &options)
            .unwrap_err();
        assert!(err.is_shape());
    }

    #[test]
    fn test_bleu_identical() {
        let sentence = "the quick brown fox jumps over the lazy dog";
        let result = run(&BleuMetric::new(), &json!([sentence]), &json!([sentence]));
        assert!(approx(result.score(), 1.0));
        assert!(approx(result.extra()["brevity_penalty"].as_f64().unwrap(), 1.0));
    }

    #[test]
    fn test_bleu_no_overlap_is_zero() {
        let result = run(
            &BleuMetric::new(),
            &json!(["alpha beta gamma delta"]),
            &json!(["one two three four"]),
        );
        assert!(approx(result.score(), 0.0));
    }

    #[test]
    fn test_bleu_brevity_penalty() {
        let result = run(
            &BleuMetric::new(),
            &json!(["the quick brown fox"]),
            &json!([["the quick brown fox jumps over the lazy dog", "the quick brown fox jumps"]]),
        );
        assert_eq!(result.extra()["reference_length"], json!(5));
        let bp = result.extra()["brevity_penalty"].as_f64().unwrap();
        assert!(approx(bp, (1.0_f64 - 5.0 / 4.0).exp()));
        assert!(approx(result.score(), bp));
    }

    #[test]
    fn test_rouge_composite_score() {
        let result = run(&RougeMetric::new(), &json!(["the cat"]), &json!(["the dog"]));
        let rouge = result.extra()["rouge"].as_object().unwrap();
        assert!(approx(rouge["rouge1"].as_f64().unwrap(), 0.5));
        assert!(approx(rouge["rouge2"].as_f64().unwrap(), 0.0));
        assert!(approx(rouge["rougeL"].as_f64().unwrap(), 0.5));
        assert!(approx(result.score(), 1.0 / 3.0));
    }

    #[test]
    fn test_rouge_identical() {
        let result = run(
            &RougeMetric::new(),
            &json!(["a b c d", "x y"]),
            &json!(["a b c d", ["z", "x y"]]),
        );
        assert!(approx(result.score(), 1.0));
    }

    #[test]
    fn test_lcs_length() {
        let a = tokenize("a b c d e");
        let b = tokenize("a c e f");
        assert_eq!(lcs_length(&a, &b), 3);
    }

    #[test]
    fn test_meteor() {
        let sentence = "the cat sat on the mat";
        let score = meteor_pair(sentence, sentence);
        assert!(score > 0.99 && score < 1.0);
        assert!(approx(meteor_pair("x", "y"), 0.0));

        let shuffled = meteor_pair("mat the on sat cat the", sentence);
        assert!(shuffled < score);

        let result = run(&MeteorMetric::new(), &json!([sentence]), &json!([["no", sentence]]));
        assert!(approx(result.score(), score));
    }
}
