//! End-to-end experiment runs over generated data.

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use sklab_experiments::{run_experiment, ExperimentConfig, RunSummary};
use sklab_training::{ProgressEvent, RecordingProgressSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

struct Workspace {
    _temp: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        for dir in ["train", "test", "output"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        Self { _temp: temp, root }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn write_jsonl(&self, rel: &str, records: &[serde_json::Value]) {
        let mut text = String::new();
        for record in records {
            text.push_str(&record.to_string());
            text.push('\n');
        }
        std::fs::write(self.path(rel), text).unwrap();
    }

    fn output(&self, name: &str) -> String {
        std::fs::read_to_string(self.path("output").join(name)).unwrap()
    }

    /// Write `<name>.toml` with the given sections and run it.
    fn run(&self, name: &str, body: &str) -> (RunSummary, Vec<ProgressEvent>) {
        let path = self.path(&format!("{name}.toml"));
        std::fs::write(&path, body).unwrap();
        let config = ExperimentConfig::load(&path).unwrap();
        let sink = Arc::new(RecordingProgressSink::default());
        let summary = run_experiment(&config, sink.clone()).unwrap();
        (summary, sink.events())
    }
}

fn objective_score(text: &str) -> f64 {
    text.lines()
        .find_map(|l| l.strip_prefix("Objective function score = "))
        .unwrap()
        .parse()
        .unwrap()
}

fn grid_scores(text: &str) -> Vec<f64> {
    text.lines()
        .filter_map(|l| l.strip_prefix("Grid search score = "))
        .map(|s| s.parse().unwrap())
        .collect()
}

fn read_tsv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path).unwrap();
    let headers = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    (headers, rows)
}

/// 300 examples in 3 folds; the only informative features are tied to the fold.
fn make_cv_folds_data(ws: &Workspace) {
    let mut records = Vec::new();
    let mut folds = String::from("id,fold\n");
    for k in 0..3 {
        for i in 0..100 {
            let y = if i % 2 == 0 { "dog" } else { "cat" };
            let id = format!("{y}{}", 100 * k + i);
            records.push(json!({
                "y": y,
                "id": id,
                "x": { "f1": 1.0, "f2": -1.0, "f3": 1.0, format!("is_{y}{k}"): 1.0 }
            }));
            folds.push_str(&format!("{id},{k}\n"));
        }
    }
    ws.write_jsonl("train/test_cv_folds1.jsonlines", &records);
    std::fs::write(ws.path("train/test_cv_folds1.csv"), folds).unwrap();
}

fn cv_folds_config(ws: &Workspace, name: &str, folds_file: bool) -> String {
    let folds_line = if folds_file {
        format!("cv_folds_location = '{}'\n", ws.path("train/test_cv_folds1.csv").display())
    } else {
        String::new()
    };
    format!(
        r#"
[General]
experiment_name = "{name}"
task = "cross-validate"

[Input]
train_location = "train"
featuresets = [["test_cv_folds1"]]
learners = ["LogisticRegression"]
{folds_line}
[Tuning]
grid_search = true
objective = "accuracy"

[Output]
results = "output"
predictions = "output"
log = "output"
"#
    )
}

#[test]
fn test_specified_cv_folds_prevent_leakage() {
    let ws = Workspace::new();
    make_cv_folds_data(&ws);

    for (name, folds_file, expected_grid_lines) in [("cv_specified", true, 3), ("cv_synthesized", false, 10)] {
        let (summary, _) = ws.run(name, &cv_folds_config(&ws, name, folds_file));
        assert!(summary.succeeded(), "{:?}", summary.failures);

        let text = ws.output(&format!("{name}_test_cv_folds1_LogisticRegression.results"));
        let score = objective_score(&text);
        let grid = grid_scores(&text);
        assert_eq!(grid.len(), expected_grid_lines);
        if folds_file {
            assert!(score < 0.6, "score {score}");
            assert!(grid.iter().all(|g| *g < 0.6), "{grid:?}");
        } else {
            assert!(score > 0.95, "score {score}");
            assert!(grid.iter().all(|g| *g > 0.95), "{grid:?}");
        }
    }
}

fn make_regression_data(ws: &Workspace) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(1_234_567_890);
    let n = 2000;
    let mut train = Vec::new();
    let mut test = Vec::new();
    let mut ys = Vec::with_capacity(n);
    for i in 0..n {
        let (f1, f2, f3): (f64, f64, f64) = (rng.r#gen(), rng.r#gen(), rng.r#gen());
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.r#gen();
        let noise = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos() / 2.0;
        let y = f1 + f2 - 2.0 * f3 + noise;
        ys.push(y);
        let record = json!({ "y": y, "id": format!("EXAMPLE{i}"), "x": { "f1": f1, "f2": f2, "f3": f3 } });
        if i < n / 2 { train.push(record) } else { test.push(record) }
    }
    ws.write_jsonl("train/test_regression1.jsonlines", &train);
    ws.write_jsonl("test/test_regression1.jsonlines", &test);
    ys
}

fn regression_config(name: &str, task: &str) -> String {
    format!(
        r#"
[General]
experiment_name = "{name}"
task = "{task}"

[Input]
train_location = "train"
test_location = "test"
featuresets = [["test_regression1"]]
learners = ["RescaledRidge"]

[Tuning]
grid_search = true
objective = "pearson"

[Output]
results = "output"
predictions = "output"
models = "output"
"#
    )
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, var.sqrt())
}

#[test]
fn test_rescaled_ridge_cross_validation() {
    let ws = Workspace::new();
    let y = make_regression_data(&ws);
    let (summary, _) = ws.run("regression_cv", &regression_config("regression_cv", "cross_validate"));
    assert!(summary.succeeded(), "{:?}", summary.failures);

    let text = ws.output("regression_cv_test_regression1_RescaledRidge.results");
    assert!(objective_score(&text) > 0.7);

    let (headers, rows) = read_tsv(&ws.path("output/regression_cv_test_regression1_RescaledRidge.predictions"));
    assert_eq!(headers, vec!["id", "prediction"]);
    assert_eq!(rows.len(), 1000);
    let preds: Vec<f64> = rows.iter().map(|r| r[1].parse().unwrap()).collect();

    let y_min = y.iter().copied().fold(f64::INFINITY, f64::min);
    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert!(preds.iter().all(|p| *p >= y_min && *p <= y_max));
    let (pred_mean, pred_std) = mean_std(&preds);
    let (y_mean, y_std) = mean_std(&y);
    assert!((pred_mean - y_mean).abs() < 0.1, "{pred_mean} vs {y_mean}");
    assert!((pred_std - y_std).abs() < 0.1, "{pred_std} vs {y_std}");
}

#[test]
fn test_predict_task_writes_one_row_per_test_example() {
    let ws = Workspace::new();
    make_regression_data(&ws);
    let (summary, _) = ws.run("regression_predict", &regression_config("regression_predict", "predict"));
    assert!(summary.succeeded(), "{:?}", summary.failures);

    let (_, rows) = read_tsv(&ws.path("output/regression_predict_test_regression1_RescaledRidge.predictions"));
    assert_eq!(rows.len(), 1000);
    assert!(ws.path("output/regression_predict_test_regression1_RescaledRidge.model").is_file());
    assert!(!ws.path("output/regression_predict_test_regression1_RescaledRidge.results").exists());
}

fn make_summary_data(ws: &Workspace) {
    let mut rng = StdRng::seed_from_u64(1_234_567_890);
    for (rel, n) in [("train/test_summary.jsonlines", 500), ("test/test_summary.jsonlines", 100)] {
        let records: Vec<_> = (0..n)
            .map(|i| {
                let y = if i % 2 == 0 { "dog" } else { "cat" };
                json!({
                    "y": y,
                    "id": format!("{y}{i}"),
                    "x": { "f1": rng.gen_range(1..4), "f2": rng.gen_range(1..4), "f3": rng.gen_range(1..4) }
                })
            })
            .collect();
        ws.write_jsonl(rel, &records);
    }
}

#[test]
fn test_summary_scores_match_result_files() {
    let ws = Workspace::new();
    make_summary_data(&ws);
    let config = r#"
[General]
experiment_name = "summary"
task = "evaluate"

[Input]
train_location = "train"
test_location = "test"
featuresets = [["test_summary"]]
learners = ["LogisticRegression", "MultinomialNB", "LinearSVC"]

[Tuning]
grid_search = true
objective = "accuracy"

[Output]
results = "output"
predictions = "output"
metrics = ["f1_score_macro"]
"#;
    let (summary, events) = ws.run("summary", config);
    assert!(summary.succeeded(), "{:?}", summary.failures);
    assert_eq!(summary.records.len(), 3);
    assert_eq!(events.iter().filter(|e| matches!(e, ProgressEvent::JobFinished { .. })).count(), 3);

    let (headers, rows) = read_tsv(&ws.path("output/summary_summary.tsv"));
    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        let learner = &row[col("given_learner")];
        let text = ws.output(&format!("summary_test_summary_{learner}.results"));
        let summary_score: f64 = row[col("score")].parse().unwrap();
        assert_eq!(objective_score(&text), summary_score, "mismatched scores for {learner}");
        assert!(text.contains("f1_score_macro = "));
        assert!(text.contains("Confusion matrix"));
    }
}

#[test]
fn test_sparse_evaluate_ignores_unseen_features() {
    let ws = Workspace::new();
    let train: Vec<_> = (1..=100)
        .map(|i| {
            let y = if i % 2 == 0 { "dog" } else { "cat" };
            json!({ "y": y, "id": format!("{y}{i}"), "x": { "f2": i + 1, "f3": i + 2, "f4": i + 5 } })
        })
        .collect();
    let test: Vec<_> = (1..=50)
        .map(|i| {
            let y = if i % 2 == 0 { "dog" } else { "cat" };
            json!({ "y": y, "id": format!("{y}{i}"), "x": { "f1": i, "f2": i + 2, "f3": i % 10, "f5": i * 2 } })
        })
        .collect();
    ws.write_jsonl("train/test_sparse.jsonlines", &train);
    ws.write_jsonl("test/test_sparse.jsonlines", &test);

    let config = r#"
[General]
experiment_name = "sparse"
task = "evaluate"

[Input]
train_location = "train"
test_location = "test"
featuresets = [["test_sparse"]]
learners = ["LogisticRegression"]

[Tuning]
objective = "accuracy"

[Output]
results = "output"
predictions = "output"
vocabs = "output"
"#;
    let (summary, _) = ws.run("sparse", config);
    assert!(summary.succeeded(), "{:?}", summary.failures);

    let score = objective_score(&ws.output("sparse_test_sparse_LogisticRegression.results"));
    assert_relative_eq!(score, 0.5);
    let (_, rows) = read_tsv(&ws.path("output/sparse_test_sparse_LogisticRegression.predictions"));
    assert_eq!(rows.len(), 50);
    assert_eq!(ws.output("sparse_test_sparse_LogisticRegression.vocab"), "f2\nf3\nf4\n");
}

#[test]
fn test_failed_job_does_not_block_other_jobs() {
    let ws = Workspace::new();
    let records: Vec<_> = (0..40)
        .map(|i| {
            let y = if i % 2 == 0 { "pos" } else { "neg" };
            let signal = if i % 2 == 0 { 1.0 } else { -1.0 };
            json!({ "y": y, "id": format!("e{i}"), "x": { "signal": signal, "bias": 1.0 } })
        })
        .collect();
    ws.write_jsonl("train/signed.jsonlines", &records);

    let config = r#"
[General]
experiment_name = "mixed"
task = "cross_validate"

[Input]
train_location = "train"
featuresets = [["signed"]]
learners = ["MultinomialNB", "LogisticRegression"]
num_cv_folds = 4

[Tuning]
objective = "accuracy"

[Output]
results = "output"
"#;
    let (summary, events) = ws.run("mixed", config);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].learner.name(), "MultinomialNB");
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::JobFailed { .. })));

    assert!(!ws.path("output/mixed_signed_MultinomialNB.results").exists());
    let text = ws.output("mixed_signed_LogisticRegression.results");
    assert!(objective_score(&text) > 0.95);
    let (_, rows) = read_tsv(&ws.path("output/mixed_summary.tsv"));
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_missing_featureset_file_fails_its_jobs_only() {
    let ws = Workspace::new();
    make_summary_data(&ws);
    let config = r#"
[General]
experiment_name = "partial"
task = "train"

[Input]
train_location = "train"
featuresets = [["test_summary"], ["does_not_exist"]]
learners = ["MultinomialNB"]

[Output]
models = "output"
"#;
    let (summary, _) = ws.run("partial", config);
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].featureset, "does_not_exist");
    assert!(ws.path("output/partial_test_summary_MultinomialNB.model").is_file());
}

#[test]
fn test_failed_evaluate_leaves_no_job_files() {
    let ws = Workspace::new();
    make_summary_data(&ws);
    let unlabeled: Vec<_> = (0..20)
        .map(|i| json!({ "id": format!("u{i}"), "x": { "f1": 1 + i % 3, "f2": 2, "f3": 3 } }))
        .collect();
    ws.write_jsonl("test/test_summary.jsonlines", &unlabeled);

    let config = r#"
[General]
experiment_name = "unlabeled"
task = "evaluate"

[Input]
train_location = "train"
test_location = "test"
featuresets = [["test_summary"]]
learners = ["MultinomialNB"]

[Output]
results = "output"
predictions = "output"
models = "output"
vocabs = "output"
"#;
    let (summary, events) = ws.run("unlabeled", config);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].error.contains("has no labels"), "{}", summary.failures[0].error);
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::JobFailed { .. })));

    let leftovers: Vec<String> = std::fs::read_dir(ws.path("output"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("unlabeled_test_summary_"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}
