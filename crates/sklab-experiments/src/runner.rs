//! Experiment runner: loads featuresets, runs every `(featureset, learner)`
//! job for the configured task and writes the per-job files and the summary.
//!
//! A job writes nothing until training, prediction and scoring have all
//! succeeded. A failing job is logged, reported as
//! [`ProgressEvent::JobFailed`] and skipped; files it already wrote are
//! removed, and the remaining jobs still run.

use crate::config::{ExperimentConfig, FeaturesetSpec, Task};
use crate::error::{ExperimentError, ExperimentResult};
use crate::layout::OutputLayout;
use crate::results::{write_predictions, write_summary, ConfusionMatrix, PredictionTable, ResultRecord};
use chrono::Utc;
use sklab_training::{
    confusion_matrix, load_featureset, load_folds, save_vocabulary, score_predictions, FeatureSet, FoldAssignment,
    FoldSpec, JobId, Learner, LoadOptions, ModelKind, ProgressEvent, ProgressSink, TaskKind,
};
use std::path::PathBuf;
use std::sync::Arc;

/// A job that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub featureset: String,
    pub learner: ModelKind,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub records: Vec<ResultRecord>,
    pub failures: Vec<JobFailure>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Inputs {
    train: FeatureSet,
    test: Option<FeatureSet>,
}

fn load_inputs(config: &ExperimentConfig, spec: &FeaturesetSpec) -> ExperimentResult<Inputs> {
    let options = LoadOptions { sparse: config.sparse };
    let train = load_featureset(&config.train_location, &spec.files, &config.suffix, &options)?;
    let test = match (&config.test_location, config.task.needs_test_set()) {
        (Some(dir), true) => Some(load_featureset(dir, &spec.files, &config.suffix, &options)?),
        _ => None,
    };
    Ok(Inputs { train, test })
}

struct Job<'a> {
    config: &'a ExperimentConfig,
    layout: &'a OutputLayout,
    spec: &'a FeaturesetSpec,
    inputs: &'a Inputs,
    cv_folds: Option<&'a FoldAssignment>,
    learner: ModelKind,
}

impl Job<'_> {
    fn grid_folds(&self) -> Option<FoldSpec> {
        if !self.config.grid_search {
            return None;
        }
        match self.cv_folds {
            Some(folds) if self.config.use_folds_file_for_grid_search => Some(FoldSpec::Assigned(folds.clone())),
            _ => Some(FoldSpec::Count(self.config.grid_search_folds)),
        }
    }

    fn test_set(&self) -> ExperimentResult<&FeatureSet> {
        self.inputs
            .test
            .as_ref()
            .ok_or_else(|| ExperimentError::config(format!("task '{}' requires a test set", self.config.task)))
    }

    fn save_model(&self, learner: &Learner, written: &mut Vec<PathBuf>) -> ExperimentResult<Option<String>> {
        let model = learner.model()?;
        if let Some(path) = self.layout.vocab_path(&self.spec.name, self.learner) {
            save_vocabulary(model.vocabulary(), &path)?;
            written.push(path);
        }
        let Some(path) = self.layout.model_path(&self.spec.name, self.learner) else {
            return Ok(None);
        };
        let artifact = model.save(&path)?;
        written.push(path.clone());
        tracing::info!(path = %path.display(), sha256 = %artifact.sha256, "saved model");
        Ok(Some(artifact.sha256))
    }

    fn run(&self, progress: &Arc<dyn ProgressSink>, job_id: &JobId) -> ExperimentResult<ResultRecord> {
        let config = self.config;
        let train = &self.inputs.train;
        let started_at = Utc::now();
        let mut learner =
            Learner::new(config.learner_config(self.learner))?.with_progress(job_id.clone(), Arc::clone(progress));

        let mut record = ResultRecord {
            experiment_name: config.experiment_name.clone(),
            task: config.task,
            featureset_name: self.spec.name.clone(),
            featureset: self.spec.files.clone(),
            fingerprint: train.fingerprint().0,
            learner: self.learner,
            grid_search: config.grid_search,
            grid_objective: config.objective,
            feature_scaling: config.feature_scaling.label().to_string(),
            train_size: train.len(),
            test_size: None,
            score: None,
            grid_scores: Vec::new(),
            params: None,
            folds: Vec::new(),
            metrics: Vec::new(),
            confusion: None,
            model_sha256: None,
            started_at,
            finished_at: started_at,
            predictions: None,
        };

        match config.task {
            Task::CrossValidate => {
                let folds = match self.cv_folds {
                    Some(folds) => FoldSpec::Assigned(folds.clone()),
                    None => FoldSpec::Count(config.num_cv_folds),
                };
                let cv = learner.cross_validate(
                    train,
                    folds,
                    config.objective,
                    self.grid_folds(),
                    config.grid_search_jobs,
                )?;
                record.score = Some(cv.mean_score());
                record.grid_scores = cv.folds.iter().filter_map(|f| f.grid_score).collect();
                record.folds = cv.folds;
                record.predictions = Some(PredictionTable { ids: train.ids().to_vec(), predictions: cv.predictions });
            }
            Task::Train => {
                let score = learner.train(train, self.grid_folds(), config.objective, config.grid_search_jobs)?;
                record.score = Some(score);
                if config.grid_search {
                    record.grid_scores = vec![score];
                }
                record.params = Some(learner.model()?.params().clone());
            }
            Task::Evaluate | Task::Predict => {
                let grid_score = learner.train(train, self.grid_folds(), config.objective, config.grid_search_jobs)?;
                if config.grid_search {
                    record.grid_scores = vec![grid_score];
                }
                record.params = Some(learner.model()?.params().clone());

                let test = self.test_set()?;
                let predictions = learner.predict(test)?;
                record.test_size = Some(test.len());
                if config.task == Task::Evaluate {
                    let y_true = test.require_labels()?;
                    let mut metrics = vec![config.objective];
                    metrics.extend(config.metrics.iter().filter(|m| **m != config.objective));
                    let mut scores = score_predictions(y_true, &predictions, &metrics)?;
                    record.score = Some(scores.remove(0).1);
                    record.metrics = scores;
                    if self.learner.task() == TaskKind::Classification {
                        record.confusion = Some(ConfusionMatrix::from(confusion_matrix(y_true, &predictions.labels)));
                    }
                }
                record.predictions = Some(PredictionTable { ids: test.ids().to_vec(), predictions });
            }
        }
        record.finished_at = Utc::now();

        let mut written = Vec::new();
        if let Err(err) = self.write_outputs(&learner, &mut record, &mut written) {
            for path in &written {
                if let Err(remove_err) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %remove_err, "failed to remove partial output");
                }
            }
            return Err(err);
        }
        Ok(record)
    }

    /// Write every file of a finished job, recording each path in `written`.
    fn write_outputs(
        &self,
        learner: &Learner,
        record: &mut ResultRecord,
        written: &mut Vec<PathBuf>,
    ) -> ExperimentResult<()> {
        let (name, kind) = (self.spec.name.as_str(), self.learner);
        if self.config.task != Task::CrossValidate {
            record.model_sha256 = self.save_model(learner, written)?;
        }
        if let (Some(table), Some(path)) = (&record.predictions, self.layout.predictions_path(name, kind)) {
            write_predictions(table, &path)?;
            written.push(path);
        }
        if record.score.is_some() {
            if let Some(path) = self.layout.results_path(name, kind) {
                record.write_text(&path)?;
                written.push(path);
            }
            if let Some(path) = self.layout.results_json_path(name, kind) {
                record.write_json(&path)?;
                written.push(path);
            }
        }
        Ok(())
    }
}

/// Run every job of `config`, writing outputs as each job finishes.
///
/// Returns an error only for failures that affect the whole run (output
/// directories, the fold table, the summary file); per-job failures are
/// collected in [`RunSummary::failures`].
pub fn run_experiment(config: &ExperimentConfig, progress: Arc<dyn ProgressSink>) -> ExperimentResult<RunSummary> {
    let layout = OutputLayout::for_config(config);
    layout.ensure_dirs()?;
    let cv_folds = match &config.cv_folds_location {
        Some(path) => Some(load_folds(path)?),
        None => None,
    };
    tracing::info!(
        experiment = %config.experiment_name,
        task = %config.task,
        featuresets = config.featuresets.len(),
        learners = config.learners.len(),
        "starting experiment"
    );

    let mut summary = RunSummary::default();
    for spec in &config.featuresets {
        let inputs = match load_inputs(config, spec) {
            Ok(inputs) => inputs,
            Err(err) => {
                tracing::error!(featureset = %spec.name, error = %err, "failed to load featureset");
                for learner in &config.learners {
                    summary.failures.push(JobFailure {
                        featureset: spec.name.clone(),
                        learner: *learner,
                        error: err.to_string(),
                    });
                }
                continue;
            }
        };

        for &learner in &config.learners {
            let job_id = JobId::new();
            progress.on_event(ProgressEvent::JobStarted {
                job_id: job_id.clone(),
                featureset: spec.name.clone(),
                learner: learner.to_string(),
                task: config.task.to_string(),
            });
            let job = Job { config, layout: &layout, spec, inputs: &inputs, cv_folds: cv_folds.as_ref(), learner };
            match job.run(&progress, &job_id) {
                Ok(record) => {
                    progress.on_event(ProgressEvent::JobFinished {
                        job_id,
                        score: record.score.unwrap_or(f64::NAN),
                    });
                    summary.records.push(record);
                }
                Err(err) => {
                    progress.on_event(ProgressEvent::JobFailed { job_id, error: err.to_string() });
                    summary.failures.push(JobFailure {
                        featureset: spec.name.clone(),
                        learner,
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    if let Some(path) = layout.summary_path() {
        if summary.records.iter().any(|r| r.score.is_some()) {
            write_summary(&summary.records, &path)?;
            tracing::info!(path = %path.display(), rows = summary.records.len(), "wrote summary");
        }
    }
    if !summary.failures.is_empty() {
        tracing::warn!(failed = summary.failures.len(), "some jobs failed");
    }
    Ok(summary)
}
