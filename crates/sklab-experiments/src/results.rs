//! Result records and the files written from them.
//!
//! Each finished job yields one immutable [`ResultRecord`]. The text report,
//! its JSON twin, the predictions table and the summary row are all rendered
//! from that record, and every score goes through [`format_score`], so the
//! summary `score` column is byte-identical to the report's
//! `Objective function score` line.

use crate::config::Task;
use crate::error::{ExperimentError, ExperimentResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sklab_training::{write_atomic, FoldOutcome, HyperParams, Label, ModelKind, Objective, Predictions};
use std::fmt::Write as _;
use std::path::Path;

/// Render a score the same way everywhere (shortest round-trip form).
pub fn format_score(score: f64) -> String {
    format!("{score}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<Label>,
    /// Rows are true labels, columns predicted labels.
    pub counts: Vec<Vec<usize>>,
}

impl From<(Vec<Label>, Vec<Vec<usize>>)> for ConfusionMatrix {
    fn from((labels, counts): (Vec<Label>, Vec<Vec<usize>>)) -> Self {
        Self { labels, counts }
    }
}

/// Predictions aligned with the ids they were made for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionTable {
    pub ids: Vec<String>,
    pub predictions: Predictions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub experiment_name: String,
    pub task: Task,
    pub featureset_name: String,
    pub featureset: Vec<String>,
    pub fingerprint: String,
    pub learner: ModelKind,
    pub grid_search: bool,
    pub grid_objective: Objective,
    pub feature_scaling: String,
    pub train_size: usize,
    pub test_size: Option<usize>,
    /// Final objective score; absent for predict.
    pub score: Option<f64>,
    /// Best grid score per outer fold (cross-validation) or for the single fit.
    pub grid_scores: Vec<f64>,
    /// Hyperparameters of the final model, when one was kept.
    pub params: Option<HyperParams>,
    pub folds: Vec<FoldOutcome>,
    /// Extra metrics requested for evaluate, in request order.
    pub metrics: Vec<(Objective, f64)>,
    pub confusion: Option<ConfusionMatrix>,
    pub model_sha256: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip)]
    pub predictions: Option<PredictionTable>,
}

impl ResultRecord {
    pub fn grid_score(&self) -> Option<f64> {
        match self.grid_scores.as_slice() {
            [] => None,
            scores => Some(scores.iter().sum::<f64>() / scores.len() as f64),
        }
    }

    /// Text report with header, overall score and per-fold blocks.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Experiment: {}", self.experiment_name);
        let _ = writeln!(out, "Task: {}", self.task);
        let _ = writeln!(out, "Featureset: {} ({})", self.featureset_name, self.featureset.join(", "));
        let _ = writeln!(out, "Featureset fingerprint: {}", self.fingerprint);
        let _ = writeln!(out, "Learner: {}", self.learner);
        let _ = writeln!(out, "Feature scaling: {}", self.feature_scaling);
        let _ = writeln!(out, "Grid search: {}", if self.grid_search { "tuned" } else { "untuned" });
        let _ = writeln!(out, "Grid objective: {}", self.grid_objective);
        let _ = writeln!(out, "Training examples: {}", self.train_size);
        if let Some(test_size) = self.test_size {
            let _ = writeln!(out, "Test examples: {test_size}");
        }
        if let Some(sha) = &self.model_sha256 {
            let _ = writeln!(out, "Model sha256: {sha}");
        }
        let _ = writeln!(out, "Started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "Finished: {}", self.finished_at.to_rfc3339());
        out.push('\n');

        if let Some(score) = self.score {
            let _ = writeln!(out, "Objective function score = {}", format_score(score));
        }
        for (metric, score) in &self.metrics {
            let _ = writeln!(out, "{metric} = {}", format_score(*score));
        }
        if self.folds.is_empty() {
            if let Some(grid_score) = self.grid_score() {
                let _ = writeln!(out, "Grid search score = {}", format_score(grid_score));
            }
            if let Some(params) = &self.params {
                let _ = writeln!(out, "Hyperparameters: {params}");
            }
            if let Some(confusion) = &self.confusion {
                render_confusion(&mut out, confusion);
            }
        }

        for fold in &self.folds {
            out.push('\n');
            let _ = writeln!(out, "Fold: {}", fold.fold);
            let _ = writeln!(out, "Training/held-out examples: {}/{}", fold.train_size, fold.test_size);
            if let Some(grid_score) = fold.grid_score {
                let _ = writeln!(out, "Grid search score = {}", format_score(grid_score));
            }
            let _ = writeln!(out, "Hyperparameters: {}", fold.params);
            let _ = writeln!(out, "Held-out score = {}", format_score(fold.score));
            if let Some(confusion) = &fold.confusion {
                render_confusion(&mut out, &ConfusionMatrix::from(confusion.clone()));
            }
        }
        out
    }

    pub fn write_text(&self, path: &Path) -> ExperimentResult<()> {
        write_atomic(path, self.render_text().as_bytes())?;
        Ok(())
    }

    pub fn write_json(&self, path: &Path) -> ExperimentResult<()> {
        write_atomic(path, &serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn render_confusion(out: &mut String, confusion: &ConfusionMatrix) {
    let _ = writeln!(out, "Confusion matrix (rows = true, columns = predicted):");
    let header: Vec<String> = confusion.labels.iter().map(ToString::to_string).collect();
    let _ = writeln!(out, "\t{}", header.join("\t"));
    for (label, row) in confusion.labels.iter().zip(&confusion.counts) {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "{label}\t{}", cells.join("\t"));
    }
}

fn finish_tsv(writer: csv::Writer<Vec<u8>>) -> ExperimentResult<Vec<u8>> {
    writer.into_inner().map_err(|e| ExperimentError::Io(e.into_error()))
}

fn tsv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new())
}

/// Write `id` plus one `prediction` column, or one column per class in probability mode.
pub fn write_predictions(table: &PredictionTable, path: &Path) -> ExperimentResult<()> {
    let predictions = &table.predictions;
    if table.ids.len() != predictions.len() {
        return Err(ExperimentError::config(format!(
            "{} ids but {} predictions",
            table.ids.len(),
            predictions.len()
        )));
    }
    let mut writer = tsv_writer();
    match &predictions.probabilities {
        Some(probabilities) => {
            let mut header = vec!["id".to_string()];
            header.extend(predictions.classes.iter().map(ToString::to_string));
            writer.write_record(&header)?;
            for (id, row) in table.ids.iter().zip(probabilities.rows()) {
                let mut record = vec![id.clone()];
                record.extend(row.iter().map(|p| p.to_string()));
                writer.write_record(&record)?;
            }
        }
        None => {
            writer.write_record(["id", "prediction"])?;
            for (id, label) in table.ids.iter().zip(&predictions.labels) {
                writer.write_record([id.clone(), label.to_string()])?;
            }
        }
    }
    write_atomic(path, &finish_tsv(writer)?)?;
    Ok(())
}

pub const SUMMARY_COLUMNS: [&str; 14] = [
    "experiment_name",
    "task",
    "featureset_name",
    "featureset",
    "given_learner",
    "learner_name",
    "grid_search",
    "grid_objective",
    "feature_scaling",
    "grid_score",
    "score",
    "train_size",
    "test_size",
    "fingerprint",
];

/// One row per `(featureset, learner, task)` record that carries a score.
pub fn write_summary(records: &[ResultRecord], path: &Path) -> ExperimentResult<()> {
    let mut writer = tsv_writer();
    writer.write_record(SUMMARY_COLUMNS)?;
    for record in records {
        let Some(score) = record.score else { continue };
        writer.write_record([
            record.experiment_name.clone(),
            record.task.to_string(),
            record.featureset_name.clone(),
            record.featureset.join("+"),
            record.learner.to_string(),
            record.learner.name().to_string(),
            record.grid_search.to_string(),
            record.grid_objective.to_string(),
            record.feature_scaling.clone(),
            record.grid_score().map(format_score).unwrap_or_default(),
            format_score(score),
            record.train_size.to_string(),
            record.test_size.map(|n| n.to_string()).unwrap_or_default(),
            record.fingerprint.clone(),
        ])?;
    }
    write_atomic(path, &finish_tsv(writer)?)?;
    Ok(())
}
