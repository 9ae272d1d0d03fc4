//! Label distribution metrics.

use crate::error::Result;
use crate::metric::{backend_metric, BackendMetric, ComputeOptions, MetricDomain, ScoringBackend};
use crate::normalize::Canonical;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Confusion counts over the sorted union of labels.
///
/// Rows are reference labels, columns are predicted labels.
#[must_use]
pub fn confusion_matrix(
    predictions: &[&str],
    references: &[&str],
) -> (Vec<String>, Vec<Vec<usize>>) {
    let labels: BTreeSet<&str> = predictions.iter().chain(references).copied().collect();
    let position: BTreeMap<&str, usize> = labels.iter().enumerate().map(|(i, l)| (*l, i)).collect();

    let mut matrix = vec![vec![0_usize; labels.len()]; labels.len()];
    for (prediction, reference) in predictions.iter().zip(references) {
        if let (Some(row), Some(col)) = (position.get(reference), position.get(prediction)) {
            matrix[*row][*col] += 1;
        }
    }

    (labels.into_iter().map(str::to_string).collect(), matrix)
}

/// Confusion matrix over flattened pairs
#[derive(Debug, Clone, Copy, Default)]
pub struct Confusion;

impl ScoringBackend for Confusion {
    fn score(
        &self,
        predictions: &[Canonical],
        references: &[Canonical],
        _options: &ComputeOptions,
    ) -> Result<Map<String, Value>> {
        let predictions: Vec<&str> = predictions.iter().filter_map(Canonical::as_single).collect();
        let references: Vec<&str> = references.iter().filter_map(Canonical::as_single).collect();
        let (labels, matrix) = confusion_matrix(&predictions, &references);

        let mut out = Map::new();
        out.insert("confusion_matrix".to_string(), json!(matrix));
        out.insert("labels".to_string(), json!(labels));
        Ok(out)
    }
}

backend_metric! {
    /// Confusion matrix of a classification batch. Has no scalar score.
    ConfusionMatrix => BackendMetric::new(
        "ConfusionMatrix",
        MetricDomain::Classification,
        Confusion,
    )
    .flattened()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metric::Metric;
    use crate::structures::Instance;
    use serde_json::json;

    #[test]
    fn test_confusion_matrix_counts() {
        let (labels, matrix) = confusion_matrix(
            &["cat", "dog", "dog", "cat"],
            &["cat", "dog", "cat", "bird"],
        );
        assert_eq!(labels, vec!["bird", "cat", "dog"]);
        // rows: reference bird, cat, dog
        assert_eq!(matrix, vec![vec![0, 1, 0], vec![0, 1, 1], vec![0, 0, 1]]);
    }

    #[test]
    fn test_confusion_metric_result() {
        let predictions = Instance::try_from(serde_json::json!([1, 0, 1])).unwrap();
        let references = Instance::try_from(serde_json::json!([1, [0, 1], 0])).unwrap();
        let result = ConfusionMatrix::new()
            .compute(&predictions, &references, &ComputeOptions::new())
            .unwrap();

        assert!(result.score().is_nan());
        assert_eq!(result.total_items(), 4);
        assert_eq!(result.metric_name(), "ConfusionMatrix");
        assert_eq!(result.extra()["labels"], json!(["0", "1"]));
        assert_eq!(result.extra()["confusion_matrix"], json!([[1, 1], [1, 1]]));
        assert_eq!(result.extra()["flattened"], json!(true));
    }

    #[test]
    fn test_confusion_metric_empty() {
        let result = ConfusionMatrix::new()
            .compute(&Instance::empty(), &Instance::empty(), &ComputeOptions::new())
            .unwrap();
        assert_eq!(result.total_items(), 0);
        assert!(result.extra().is_empty());
    }

    #[test]
    fn test_confusion_metric_domain() {
        assert_eq!(ConfusionMatrix::new().domain(), MetricDomain::Classification);
    }
}
