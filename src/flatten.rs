//! Flattening of normalized batches into aligned (prediction, reference) pairs.
//!
//! Metrics that can only score one-to-one pairs run their input through a
//! [`Flattener`] first. A single prediction with several references expands
//! into one pair per reference; the judge flattener additionally expands
//! several predictions against one reference.

use crate::error::{EvalError, Result};
use crate::normalize::Canonical;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::sync::Arc;

/// Chooses which candidates survive when an item has more than `max_n`
pub trait TruncationStrategy: fmt::Debug + Send + Sync {
    /// Ascending indices of the kept candidates. Called only with `len > max_n`.
    fn select(&self, len: usize, max_n: usize) -> Vec<usize>;
}

/// Keep the first `max_n` candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Head;

impl TruncationStrategy for Head {
    fn select(&self, _len: usize, max_n: usize) -> Vec<usize> {
        (0..max_n).collect()
    }
}

/// Reproducible random subset, kept in original order.
///
/// The generator is re-seeded on every call, so the same item always yields
/// the same subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededSample {
    seed: u64,
}

impl SeededSample {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }
}

impl TruncationStrategy for SeededSample {
    fn select(&self, len: usize, max_n: usize) -> Vec<usize> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut picked = rand::seq::index::sample(&mut rng, len, max_n).into_vec();
        picked.sort_unstable();
        picked
    }
}

/// Aligned flat pairs plus the originating item index of each pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatPairs {
    pub predictions: Vec<String>,
    pub references: Vec<String>,
    pub origin: Vec<usize>,
}

impl FlatPairs {
    #[must_use]
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    fn push(&mut self, prediction: &str, reference: &str, origin: usize) {
        self.predictions.push(prediction.to_string());
        self.references.push(reference.to_string());
        self.origin.push(origin);
    }
}

/// Pair expansion policy
#[derive(Debug, Clone)]
pub struct Flattener {
    max_n: Option<usize>,
    truncation: Arc<dyn TruncationStrategy>,
    allow_multiple_predictions: bool,
}

impl Default for Flattener {
    fn default() -> Self {
        Self::strict()
    }
}

impl Flattener {
    /// Unbounded 1:N expansion; multiple predictions are rejected
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_n: None,
            truncation: Arc::new(Head),
            allow_multiple_predictions: false,
        }
    }

    /// Flattener used by the judge metric: N:1 and 1:N, bounded by `max_n`
    #[must_use]
    pub fn judge(max_n: Option<usize>) -> Self {
        Self::strict()
            .with_max_n(max_n)
            .allow_multiple_predictions(true)
    }

    /// Bound on candidates per item. `None` and `Some(0)` mean unbounded.
    #[must_use]
    pub fn with_max_n(mut self, max_n: Option<usize>) -> Self {
        self.max_n = max_n.filter(|n| *n > 0);
        self
    }

    #[must_use]
    pub fn with_truncation(mut self, truncation: impl TruncationStrategy + 'static) -> Self {
        self.truncation = Arc::new(truncation);
        self
    }

    #[must_use]
    pub const fn allow_multiple_predictions(mut self, allow: bool) -> Self {
        self.allow_multiple_predictions = allow;
        self
    }

    #[must_use]
    pub const fn max_n(&self) -> Option<usize> {
        self.max_n
    }

    fn truncate<'a>(&self, candidates: &'a [String]) -> Vec<&'a String> {
        match self.max_n {
            Some(max_n) if candidates.len() > max_n => self
                .truncation
                .select(candidates.len(), max_n)
                .into_iter()
                .filter_map(|index| candidates.get(index))
                .collect(),
            _ => candidates.iter().collect(),
        }
    }

    /// Expand normalized batches into one-to-one pairs.
    ///
    /// # Errors
    ///
    /// Returns a shape error when the batches differ in length, when an item
    /// has no candidates on either side, when an item
    /// has multiple predictions and multiple references, or when an item has
    /// multiple predictions and this flattener does not allow them.
    pub fn flatten(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
    ) -> Result<FlatPairs> {
        if predictions.len() != references.len() {
            return Err(EvalError::shape(format!(
                "{} predictions vs {} references",
                predictions.len(),
                references.len()
            )));
        }

        let mut flat = FlatPairs::default();
        for (index, (prediction, reference)) in predictions.iter().zip(references).enumerate() {
            if prediction.candidates().is_empty() || reference.candidates().is_empty() {
                return Err(EvalError::shape(format!(
                    "item {index}: candidate list is empty"
                )));
            }
            match (prediction, reference) {
                (Canonical::Single(p), Canonical::Single(r)) => flat.push(p, r, index),
                (Canonical::Single(p), Canonical::Multiple(refs)) => {
                    for r in self.truncate(refs) {
                        flat.push(p, r, index);
                    }
                }
                (Canonical::Multiple(preds), Canonical::Single(r)) => {
                    if !self.allow_multiple_predictions {
                        return Err(EvalError::shape(format!(
                            "item {index}: cannot handle multiple predictions"
                        )));
                    }
                    for p in self.truncate(preds) {
                        flat.push(p, r, index);
                    }
                }
                (Canonical::Multiple(_), Canonical::Multiple(_)) => {
                    return Err(EvalError::shape(format!(
                        "item {index}: multiple predictions against multiple references"
                    )));
                }
            }
        }

        debug_assert_eq!(flat.predictions.len(), flat.references.len());
        Ok(flat)
    }
}

/// Strict 1:N flattening
///
/// # Errors
///
/// See [`Flattener::flatten`].
pub fn flatten_references(
    predictions: &[Canonical],
    references: &[Canonical],
) -> Result<FlatPairs> {
    Flattener::strict().flatten(predictions, references)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn single(value: &str) -> Canonical {
        Canonical::Single(value.to_string())
    }

    fn multiple(values: &[&str]) -> Canonical {
        Canonical::Multiple(values.iter().map(|v| (*v).to_string()).collect())
    }

    #[test]
    fn test_single_single() {
        let flat =
            flatten_references(&[single("a"), single("b")], &[single("x"), single("y")]).unwrap();
        assert_eq!(flat.predictions, vec!["a", "b"]);
        assert_eq!(flat.references, vec!["x", "y"]);
        assert_eq!(flat.origin, vec![0, 1]);
    }

    #[test]
    fn test_one_to_many() {
        let preds = [single("Pred 1"), single("Pred 2")];
        let refs = [multiple(&["Ref 1.1", "Ref 1.2"]), single("Ref 2")];
        let flat = flatten_references(&preds, &refs).unwrap();

        assert_eq!(flat.len(), 3);
        assert_eq!(flat.predictions, vec!["Pred 1", "Pred 1", "Pred 2"]);
        assert_eq!(flat.references, vec!["Ref 1.1", "Ref 1.2", "Ref 2"]);
        assert_eq!(flat.origin, vec![0, 0, 1]);
    }

    #[test]
    fn test_many_to_one_fails_in_strict_mode() {
        let preds = [single("ok"), multiple(&["p1", "p2"])];
        let refs = [single("r"), single("r")];
        let err = flatten_references(&preds, &refs).unwrap_err();
        assert!(err.is_shape());
        assert!(err.to_string().contains("item 1"));
    }

    #[test]
    fn test_many_to_many_always_fails() {
        let preds = [multiple(&["p1", "p2"])];
        let refs = [multiple(&["r1", "r2"])];
        assert!(Flattener::judge(None).flatten(&preds, &refs).is_err());
        assert!(flatten_references(&preds, &refs).is_err());
    }

    #[test]
    fn test_empty_candidates_fail() {
        let err = flatten_references(&[single("a"), single("b")], &[multiple(&[]), single("b")])
            .unwrap_err();
        assert!(err.is_shape());
        assert!(err.to_string().contains("item 0"));

        let err = Flattener::judge(None)
            .flatten(&[multiple(&[])], &[single("a")])
            .unwrap_err();
        assert!(err.is_shape());
    }

    #[test]
    fn test_length_mismatch() {
        let err = flatten_references(&[single("a")], &[]).unwrap_err();
        assert!(err.is_shape());
        assert!(err.to_string().contains("1 predictions vs 0 references"));
    }

    #[test]
    fn test_empty_batches() {
        let flat = flatten_references(&[], &[]).unwrap();
        assert!(flat.is_empty());
    }

    #[test]
    fn test_judge_many_to_one() {
        let preds = [multiple(&["p1", "p2", "p3"])];
        let refs = [single("r")];
        let flat = Flattener::judge(None).flatten(&preds, &refs).unwrap();
        assert_eq!(flat.predictions, vec!["p1", "p2", "p3"]);
        assert_eq!(flat.references, vec!["r", "r", "r"]);
    }

    #[test]
    fn test_max_n_head_truncation() {
        let flattener = Flattener::judge(Some(2));
        let preds = [multiple(&["p1", "p2", "p3"]), single("q")];
        let refs = [single("r"), multiple(&["s1", "s2", "s3", "s4"])];
        let flat = flattener.flatten(&preds, &refs).unwrap();

        assert_eq!(flat.predictions, vec!["p1", "p2", "q", "q"]);
        assert_eq!(flat.references, vec!["r", "r", "s1", "s2"]);
        assert_eq!(flat.origin, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_max_n_zero_is_unbounded() {
        let flattener = Flattener::judge(Some(0));
        assert_eq!(flattener.max_n(), None);
        let flat = flattener
            .flatten(&[single("p")], &[multiple(&["a", "b", "c"])])
            .unwrap();
        assert_eq!(flat.len(), 3);
    }

    #[test]
    fn test_seeded_sample_reproducible_and_ordered() {
        let candidates: Vec<&str> = vec!["c0", "c1", "c2", "c3", "c4", "c5", "c6", "c7"];
        let flattener = Flattener::judge(Some(3)).with_truncation(SeededSample::new(42));

        let refs = [multiple(&candidates)];
        let first = flattener.flatten(&[single("p")], &refs).unwrap();
        let second = flattener.flatten(&[single("p")], &refs).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        let positions: Vec<usize> = first
            .references
            .iter()
            .map(|r| candidates.iter().position(|c| c == r).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_seeded_sample_select_bounds() {
        let picked = SeededSample::new(7).select(10, 4);
        assert_eq!(picked.len(), 4);
        assert!(picked.iter().all(|i| *i < 10));
    }
}
