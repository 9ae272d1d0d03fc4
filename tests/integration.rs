//! Integration tests for text-eval CLI and library.
//!
//! These tests verify end-to-end functionality including:
//! - Mixed input shapes score identically across metrics
//! - The judge metric works over a stub backend
//! - Comparison reports across pipelines
//! - YAML configuration and the CLI

#![allow(clippy::unwrap_used)]
#![allow(clippy::float_cmp)]

use serde_json::{json, Value};
use std::process::Command;
use std::sync::{Arc, Mutex};
use text_eval::{
    build_comparison, normalize, Aggregation, Canonical, Comparison, ComputeOptions, EvalConfig,
    EvalError, EvaluationPipeline, Evaluator, ExactMatchMetric, Flattener, Instance,
    JudgeBackend, LlmJudgeMetric, Metric, ModelWrapper, PredictionRecord, ReferenceRecord,
    SimpleEvaluationPipeline,
};

fn instance(value: Value) -> Instance {
    Instance::try_from(value).unwrap()
}

// ============================================================================
// Normalization Integration Tests
// ============================================================================

#[test]
fn test_all_input_shapes_share_one_canonical_form() {
    let texts = instance(json!(["A", "B"]));
    let mappings = instance(json!([{ "value": "A" }, { "text": "B" }]));
    let records = Instance::from(vec![
        PredictionRecord::new("A").with_score(0.9),
        PredictionRecord::new("B"),
    ]);

    let expected = normalize(&texts).unwrap();
    assert_eq!(normalize(&mappings).unwrap(), expected);
    assert_eq!(normalize(&records).unwrap(), expected);
    assert_eq!(
        expected,
        vec![Canonical::Single("A".into()), Canonical::Single("B".into())]
    );
}

#[test]
fn test_evaluator_is_shape_agnostic() {
    let evaluator = Evaluator::question_answering().unwrap();
    let options = ComputeOptions::new();

    let plain = evaluator
        .evaluate(
            &instance(json!(["paris", "blue whale"])),
            &instance(json!(["paris", "whale"])),
            &options,
        )
        .unwrap();
    let mixed = evaluator
        .evaluate(
            &instance(json!([{ "value": "paris" }, "blue whale"])),
            &Instance::from(vec![
                Instance::from(ReferenceRecord::new("paris")),
                Instance::from(vec!["whale"]),
            ]),
            &options,
        )
        .unwrap();

    assert_eq!(plain, mixed);
    assert_eq!(plain["AccuracyMetric"].score(), 0.5);
    assert_eq!(plain["F1Metric"].total_items(), 2);
}

#[test]
fn test_multi_reference_flattening_counts_pairs() {
    let metric = ExactMatchMetric::new();
    let result = metric
        .compute(
            &instance(json!(["a", "b"])),
            &instance(json!([["a", "x", "y"], "b"])),
            &ComputeOptions::new(),
        )
        .unwrap();
    assert_eq!(result.total_items(), 4);
    assert_eq!(result.extra()["flattened"], json!(true));
}

#[test]
fn test_strict_flattening_rejects_multiple_predictions() {
    let predictions = normalize(&instance(json!([["a", "b"]]))).unwrap();
    let references = normalize(&instance(json!(["a"]))).unwrap();
    let err = Flattener::strict()
        .flatten(&predictions, &references)
        .unwrap_err();
    assert!(err.is_shape());

    let err = ExactMatchMetric::new()
        .compute(
            &instance(json!([["a", "b"]])),
            &instance(json!(["a"])),
            &ComputeOptions::new(),
        )
        .unwrap_err();
    assert!(matches!(err, EvalError::Shape(_)));
}

#[test]
fn test_empty_batch_yields_zero_items() {
    let evaluator = Evaluator::text_classification().unwrap();
    let output = evaluator
        .evaluate(&Instance::empty(), &Instance::empty(), &ComputeOptions::new())
        .unwrap();
    assert_eq!(output.len(), 5);
    for result in output.values() {
        assert_eq!(result.total_items(), 0);
        assert!(result.score().is_nan());
    }
}

// ============================================================================
// Judge Integration Tests
// ============================================================================

/// Says yes when the prediction text appears in the reference
#[derive(Default, Clone)]
struct SubstringJudge {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl JudgeBackend for SubstringJudge {
    fn classify(&self, prompt: &str) -> text_eval::Result<u8> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let field = |label: &str| {
            prompt
                .lines()
                .find_map(|line| line.strip_prefix(label))
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        Ok(u8::from(field("Reference:").contains(&field("Prediction:"))))
    }

    fn model(&self) -> &str {
        "substring"
    }
}

#[test]
fn test_judge_inside_evaluator() {
    let judge = SubstringJudge::default();
    let prompts = Arc::clone(&judge.prompts);

    let evaluator = Evaluator::builder()
        .add_metric(Box::new(
            LlmJudgeMetric::new(judge)
                .with_n_tries(2)
                .with_aggregation(Aggregation::Max),
        ))
        .unwrap()
        .build()
        .unwrap();

    let output = evaluator
        .evaluate(
            &instance(json!(["cat", "dog"])),
            &instance(json!([["a cat", "the bird"], "a fox"])),
            &ComputeOptions::new(),
        )
        .unwrap();

    let result = &output[LlmJudgeMetric::NAME];
    // pairs: (cat, a cat) = 1, (cat, the bird) = 0, (dog, a fox) = 0
    assert_eq!(result.total_items(), 3);
    assert!((result.score() - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(result.extra()["model"], json!("substring"));
    assert_eq!(prompts.lock().unwrap().len(), 6);
}

#[test]
fn test_judge_truncation_bounds_calls() {
    let judge = SubstringJudge::default();
    let prompts = Arc::clone(&judge.prompts);
    let metric = LlmJudgeMetric::new(judge).with_max_n(Some(1));

    let result = metric
        .compute(
            &instance(json!(["x"])),
            &instance(json!([["x", "y", "z"]])),
            &ComputeOptions::new(),
        )
        .unwrap();
    assert_eq!(result.total_items(), 1);
    assert_eq!(result.score(), 1.0);
    assert_eq!(prompts.lock().unwrap().len(), 1);
}

// ============================================================================
// Comparison Integration Tests
// ============================================================================

/// Echoes its string inputs as predictions
struct Echo;

impl ModelWrapper for Echo {
    fn predict(&self, inputs: &[Value]) -> text_eval::Result<Instance> {
        Instance::try_from(Value::Array(inputs.to_vec()))
    }
}

/// Always predicts the same label
struct Constant(&'static str);

impl ModelWrapper for Constant {
    fn predict(&self, inputs: &[Value]) -> text_eval::Result<Instance> {
        Ok(Instance::from(vec![self.0; inputs.len()]))
    }
}

#[test]
fn test_comparison_across_models() {
    let echo = SimpleEvaluationPipeline::single(Echo, Evaluator::question_answering().unwrap())
        .with_name("echo");
    let constant = SimpleEvaluationPipeline::single(
        Constant("yes"),
        Evaluator::question_answering().unwrap(),
    );

    let inputs = vec![json!("yes"), json!("no"), json!("maybe")];
    let references = instance(json!(["yes", "no", ["maybe", "perhaps"]]));
    let pipelines: [&dyn EvaluationPipeline; 2] = [&echo, &constant];

    let comparison = build_comparison(&pipelines, &inputs, &references).unwrap();
    let Comparison::Table(table) = &comparison else {
        panic!("expected a table");
    };

    assert_eq!(table.pipelines, vec!["echo", "eval-pipe-1"]);
    assert_eq!(table.score("AccuracyMetric", "echo"), Some(1.0));
    assert!((table.score("AccuracyMetric", "eval-pipe-1").unwrap() - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(table.rows.len(), 3);

    let json: Value = serde_json::from_str(&comparison.to_json().unwrap()).unwrap();
    assert_eq!(json["kind"], "table");
    assert!(comparison.to_markdown().contains("eval-pipe-1"));
}

// ============================================================================
// Configuration & CLI Integration Tests
// ============================================================================

#[test]
fn test_config_file_builds_evaluator() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("eval.yaml");
    std::fs::write(&path, "metrics:\n  - accuracy\n  - bleu\n  - rouge-l\n").unwrap();

    let evaluator = EvalConfig::load(&path).unwrap().build_evaluator().unwrap();
    assert_eq!(
        evaluator.metric_names(),
        vec!["AccuracyMetric", "BleuMetric", "RougeMetric"]
    );
}

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_text-eval"))
}

#[test]
fn test_cli_help_command() {
    let output = cli().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("evaluate"));
    assert!(stdout.contains("metrics"));
}

#[test]
fn test_cli_metrics_lists_kinds() {
    let output = cli().arg("metrics").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("exact_match"));
    assert!(stdout.contains("llm_judge"));
}

#[test]
fn test_cli_evaluate_json() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = temp_dir.path().join("eval.yaml");
    std::fs::write(&config, "metrics: [accuracy, f1]\n").unwrap();

    let good = temp_dir.path().join("good.json");
    std::fs::write(
        &good,
        r#"{"predictions": ["a", "b"], "references": ["a", ["b", "c"]]}"#,
    )
    .unwrap();
    let bad = temp_dir.path().join("bad.json");
    std::fs::write(
        &bad,
        r#"{"name": "guessing", "predictions": ["x", "b"], "references": ["a", ["b", "c"]]}"#,
    )
    .unwrap();

    let output = cli()
        .arg("evaluate")
        .arg("--config")
        .arg(&config)
        .arg("--data")
        .arg(&good)
        .arg("--data")
        .arg(&bad)
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["pipelines"], json!(["good", "guessing"]));
    assert_eq!(report["rows"][0]["metric"], "AccuracyMetric");
    assert_eq!(report["rows"][0]["scores"], json!([1.0, 0.5]));
}

#[test]
fn test_cli_evaluate_reports_errors() {
    let temp_dir = tempfile::tempdir().unwrap();
    let data = temp_dir.path().join("data.json");
    std::fs::write(&data, r#"{"predictions": ["a"], "references": ["a", "b"]}"#).unwrap();

    let output = cli()
        .arg("evaluate")
        .arg("--data")
        .arg(&data)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));

    let output = cli()
        .args(["evaluate", "--data", "/nonexistent/data.json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_cli_evaluate_same_file_stem_keeps_both_columns() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for (run, prediction) in [("first", "a"), ("second", "x")] {
        let dir = temp_dir.path().join(run);
        std::fs::create_dir(&dir).unwrap();
        let path = dir.join("data.json");
        std::fs::write(
            &path,
            format!(r#"{{"predictions": ["{prediction}"], "references": ["a"]}}"#),
        )
        .unwrap();
        paths.push(path);
    }

    let output = cli()
        .arg("evaluate")
        .arg("--data")
        .arg(&paths[0])
        .arg("--data")
        .arg(&paths[1])
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["pipelines"], json!(["data", "data-1"]));
    assert_eq!(report["rows"][0]["scores"], json!([1.0, 0.0]));
}
