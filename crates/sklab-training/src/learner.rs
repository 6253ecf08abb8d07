//! The learner: an estimator family wrapped with feature selection, scaling,
//! label encoding and nested grid search.
//!
//! A [`Learner`] starts untrained. [`Learner::train`] fits a [`TrainedModel`]
//! (replacing any previous one); [`Learner::predict`] and
//! [`Learner::evaluate`] require one and fail with a state error otherwise.
//! [`Learner::cross_validate`] never touches the learner's own model: every
//! outer fold trains a fresh one on that fold's training rows only.

use crate::dataset::{FeatureSet, Label, Vocabulary};
use crate::error::{TrainingError, TrainingResult};
use crate::estimators::{FittedModel, HyperParams, ModelKind, RawOutput, TaskKind, Targets};
use crate::folds::{folds_for, FoldSpec, Split, DEFAULT_SEED};
use crate::grid::{grid_search, GridSearchOutcome};
use crate::matrix::FeatureMatrix;
use crate::metrics::{confusion_matrix, Objective, Predictions};
use crate::progress::{JobId, ProgressEvent, ProgressSink};
use crate::selection::{FeatureScaling, Scaler, SelectByMinCount};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerConfig {
    pub model: ModelKind,
    /// Emit class probabilities instead of hard labels only.
    pub probability: bool,
    pub min_feature_count: usize,
    pub feature_scaling: FeatureScaling,
    /// Seed for synthesized fold partitions.
    pub seed: u64,
}

impl LearnerConfig {
    #[must_use]
    pub fn new(model: ModelKind) -> Self {
        Self {
            model,
            probability: false,
            min_feature_count: 1,
            feature_scaling: FeatureScaling::None,
            seed: DEFAULT_SEED,
        }
    }

    fn stratify(&self) -> bool {
        self.model.task() == TaskKind::Classification
    }
}

/// Column selection and scaling fitted on training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FeaturePipeline {
    selector: SelectByMinCount,
    scaler: Option<Scaler>,
}

impl FeaturePipeline {
    fn fit(matrix: &FeatureMatrix, config: &LearnerConfig) -> TrainingResult<(Self, Array2<f64>)> {
        let mut selector = SelectByMinCount::new(config.min_feature_count);
        let mut x = selector.fit_transform(matrix)?.to_dense();
        let scaler = (config.feature_scaling != FeatureScaling::None)
            .then(|| Scaler::fit(config.feature_scaling, &x));
        if let Some(scaler) = &scaler {
            scaler.transform(&mut x);
        }
        Ok((Self { selector, scaler }, x))
    }

    fn apply(&self, matrix: &FeatureMatrix) -> TrainingResult<Array2<f64>> {
        let mut x = self.selector.transform(matrix)?.to_dense();
        if let Some(scaler) = &self.scaler {
            scaler.transform(&mut x);
        }
        Ok(x)
    }
}

fn encode_targets(task: TaskKind, labels: &[Label]) -> TrainingResult<(Targets, Vec<Label>)> {
    match task {
        TaskKind::Classification => {
            let classes: Vec<Label> = labels.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
            let y = labels.iter().map(|l| classes.binary_search(l).unwrap_or_default()).collect();
            Ok((Targets::Classes { y, n_classes: classes.len() }, classes))
        }
        TaskKind::Regression => {
            let values = labels
                .iter()
                .map(|l| {
                    l.as_f64()
                        .ok_or_else(|| TrainingError::input(format!("regression needs numeric labels, got '{l}'")))
                })
                .collect::<TrainingResult<Vec<_>>>()?;
            Ok((Targets::Values(values), Vec::new()))
        }
    }
}

/// Everything needed to predict on new examples: the fit-time vocabulary,
/// the fitted selection/scaling pipeline, the class list and estimator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    config: LearnerConfig,
    featureset: String,
    vocabulary: Vocabulary,
    pipeline: FeaturePipeline,
    classes: Vec<Label>,
    params: HyperParams,
    grid: Option<GridSearchOutcome>,
    trained_at: DateTime<Utc>,
    fitted: FittedModel,
}

impl TrainedModel {
    fn fit(config: &LearnerConfig, featureset: &FeatureSet, params: &HyperParams) -> TrainingResult<Self> {
        let labels = featureset.require_labels()?;
        let (targets, classes) = encode_targets(config.model.task(), labels)?;
        let (pipeline, x) = FeaturePipeline::fit(featureset.features(), config)?;
        let fitted = config.model.estimator().fit(&x, &targets, params)?;
        Ok(Self {
            config: *config,
            featureset: featureset.name().to_string(),
            vocabulary: featureset.vocabulary().clone(),
            pipeline,
            classes,
            params: params.clone(),
            grid: None,
            trained_at: Utc::now(),
            fitted,
        })
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn kind(&self) -> ModelKind {
        self.config.model
    }

    /// Name of the featureset the model was trained on.
    pub fn featureset(&self) -> &str {
        &self.featureset
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Class labels in probability-column order; empty for regressors.
    pub fn classes(&self) -> &[Label] {
        &self.classes
    }

    /// Hyperparameters the estimator was fitted with.
    pub fn params(&self) -> &HyperParams {
        &self.params
    }

    pub fn grid(&self) -> Option<&GridSearchOutcome> {
        self.grid.as_ref()
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// Predict in input order. Features unseen at fit time are ignored.
    pub fn predict(&self, featureset: &FeatureSet) -> TrainingResult<Predictions> {
        let x = self.pipeline.apply(&featureset.project(&self.vocabulary))?;
        match self.fitted.predict(&x) {
            RawOutput::Classes { indices, probabilities } => {
                let labels = indices
                    .iter()
                    .map(|&i| {
                        self.classes.get(i).cloned().ok_or_else(|| {
                            TrainingError::State(format!("model predicted class index {i} outside its class list"))
                        })
                    })
                    .collect::<TrainingResult<Vec<_>>>()?;
                Ok(Predictions {
                    labels,
                    probabilities: probabilities.filter(|_| self.config.probability),
                    classes: self.classes.clone(),
                })
            }
            RawOutput::Values(values) => Ok(Predictions {
                labels: values.into_iter().map(Label::Number).collect(),
                probabilities: None,
                classes: Vec::new(),
            }),
        }
    }
}

/// Held-out result for one outer fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldOutcome {
    pub fold: usize,
    pub train_size: usize,
    pub test_size: usize,
    /// Best inner cross-validated score, when grid search ran.
    pub grid_score: Option<f64>,
    pub params: HyperParams,
    pub score: f64,
    /// `(labels, counts)` with rows = true label, columns = predicted; classification only.
    pub confusion: Option<(Vec<Label>, Vec<Vec<usize>>)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub folds: Vec<FoldOutcome>,
    /// Held-out predictions reassembled into the featureset's row order.
    pub predictions: Predictions,
}

impl CrossValidation {
    /// Held-out scores in fold order.
    pub fn scores(&self) -> Vec<f64> {
        self.folds.iter().map(|f| f.score).collect()
    }

    pub fn mean_score(&self) -> f64 {
        if self.folds.is_empty() {
            return f64::NAN;
        }
        self.folds.iter().map(|f| f.score).sum::<f64>() / self.folds.len() as f64
    }
}

/// Score `predictions` against `y_true` on each requested metric, in request order.
pub fn score_predictions(
    y_true: &[Label],
    predictions: &Predictions,
    metrics: &[Objective],
) -> TrainingResult<Vec<(Objective, f64)>> {
    metrics.iter().map(|m| Ok((*m, m.score(y_true, predictions)?))).collect()
}

#[derive(Clone)]
pub struct Learner {
    config: LearnerConfig,
    model: Option<TrainedModel>,
    progress: Option<(JobId, Arc<dyn ProgressSink>)>,
}

impl std::fmt::Debug for Learner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Learner")
            .field("config", &self.config)
            .field("trained", &self.model.is_some())
            .finish_non_exhaustive()
    }
}

impl Learner {
    pub fn new(config: LearnerConfig) -> TrainingResult<Self> {
        if config.probability && !config.model.estimator().supports_probabilities() {
            return Err(TrainingError::Config(format!(
                "{} does not support probability predictions",
                config.model
            )));
        }
        Ok(Self { config, model: None, progress: None })
    }

    /// Wrap a previously trained (e.g. loaded) model.
    pub fn from_model(model: TrainedModel) -> Self {
        Self { config: model.config, model: Some(model), progress: None }
    }

    #[must_use]
    pub fn with_progress(mut self, job_id: JobId, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some((job_id, sink));
        self
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> TrainingResult<&TrainedModel> {
        self.model
            .as_ref()
            .ok_or_else(|| TrainingError::State(format!("{} has not been trained", self.config.model)))
    }

    fn report(&self, event: impl FnOnce(JobId) -> ProgressEvent) {
        if let Some((job_id, sink)) = &self.progress {
            sink.on_event(event(job_id.clone()));
        }
    }

    fn check_objective(&self, objective: Objective) -> TrainingResult<()> {
        if objective.needs_probabilities() && !self.config.probability {
            return Err(TrainingError::Config(format!(
                "objective '{objective}' requires probability mode"
            )));
        }
        Ok(())
    }

    fn splits(&self, featureset: &FeatureSet, folds: FoldSpec) -> TrainingResult<Vec<Split>> {
        let assignment = match folds {
            FoldSpec::Count(k) => folds_for(featureset, k, self.config.seed, self.config.stratify())?,
            FoldSpec::Assigned(assignment) => assignment,
        };
        assignment.splits(featureset.ids())
    }

    /// Fit on `featureset`, tuning hyperparameters when `grid_folds` is given.
    ///
    /// Returns the best mean inner cross-validated score, or the training-set
    /// score when no grid search runs.
    pub fn train(
        &mut self,
        featureset: &FeatureSet,
        grid_folds: Option<FoldSpec>,
        objective: Objective,
        grid_jobs: usize,
    ) -> TrainingResult<f64> {
        self.check_objective(objective)?;
        let labels = featureset.require_labels()?;

        let Some(grid_folds) = grid_folds else {
            let model = TrainedModel::fit(&self.config, featureset, &self.config.model.estimator().default_params())?;
            let score = objective.score(labels, &model.predict(featureset)?)?;
            tracing::debug!(learner = %self.config.model, %objective, score, "trained with default hyperparameters");
            self.model = Some(model);
            return Ok(score);
        };

        let splits = self.splits(featureset, grid_folds)?;
        let grid = self.config.model.estimator().param_grid();
        let config = self.config;
        let outcome = grid_search(&grid, &splits, grid_jobs, |params, split| {
            let model = TrainedModel::fit(&config, &featureset.subset(&split.train), params)?;
            let held_out = featureset.subset(&split.test);
            objective.score(held_out.require_labels()?, &model.predict(&held_out)?)
        })?;
        for point in &outcome.points {
            self.report(|job_id| ProgressEvent::GridPointScored {
                job_id,
                params: point.params.to_string(),
                mean_score: point.mean_score,
            });
        }

        let mut model = TrainedModel::fit(&self.config, featureset, &outcome.best_params)?;
        let best_score = outcome.best_score;
        tracing::info!(
            learner = %self.config.model,
            %objective,
            params = %outcome.best_params,
            score = best_score,
            "grid search selected hyperparameters"
        );
        model.grid = Some(outcome);
        self.model = Some(model);
        Ok(best_score)
    }

    pub fn predict(&self, featureset: &FeatureSet) -> TrainingResult<Predictions> {
        self.model()?.predict(featureset)
    }

    /// Score the trained model on labeled `featureset`; never retrains.
    pub fn evaluate(&self, featureset: &FeatureSet, metrics: &[Objective]) -> TrainingResult<Vec<(Objective, f64)>> {
        let model = self.model()?;
        for metric in metrics {
            self.check_objective(*metric)?;
        }
        let predictions = model.predict(featureset)?;
        score_predictions(featureset.require_labels()?, &predictions, metrics)
    }

    /// Outer cross-validation with optional nested grid search per fold.
    ///
    /// Held-out rows of a fold never reach that fold's training (or grid
    /// search) data.
    pub fn cross_validate(
        &self,
        featureset: &FeatureSet,
        folds: FoldSpec,
        objective: Objective,
        grid_folds: Option<FoldSpec>,
        grid_jobs: usize,
    ) -> TrainingResult<CrossValidation> {
        self.check_objective(objective)?;
        let all_labels = featureset.require_labels()?;
        let splits = self.splits(featureset, folds)?;

        let classes: Vec<Label> = match self.config.model.task() {
            TaskKind::Classification => all_labels.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect(),
            TaskKind::Regression => Vec::new(),
        };
        let mut labels: Vec<Option<Label>> = vec![None; featureset.len()];
        let mut probabilities = self
            .config
            .probability
            .then(|| Array2::<f64>::zeros((featureset.len(), classes.len())));

        let mut outcomes = Vec::with_capacity(splits.len());
        for split in &splits {
            let train = featureset.subset(&split.train);
            let test = featureset.subset(&split.test);
            let mut fold_learner = Self { config: self.config, model: None, progress: self.progress.clone() };
            let fit_score = fold_learner.train(&train, grid_folds.clone(), objective, grid_jobs)?;

            let predictions = fold_learner.predict(&test)?;
            let y_true = test.require_labels()?;
            let score = objective.score(y_true, &predictions)?;
            let model = fold_learner.model()?;

            for (k, &row) in split.test.iter().enumerate() {
                labels[row] = Some(predictions.labels[k].clone());
            }
            if let (Some(all), Some(fold)) = (probabilities.as_mut(), predictions.probabilities.as_ref()) {
                for (c, class) in predictions.classes.iter().enumerate() {
                    let Ok(col) = classes.binary_search(class) else { continue };
                    for (k, &row) in split.test.iter().enumerate() {
                        all[[row, col]] = fold[[k, c]];
                    }
                }
            }

            tracing::info!(fold = split.fold, train = train.len(), test = test.len(), score, "fold finished");
            self.report(|job_id| ProgressEvent::FoldFinished { job_id, fold: split.fold, score });
            outcomes.push(FoldOutcome {
                fold: split.fold,
                train_size: train.len(),
                test_size: test.len(),
                grid_score: grid_folds.as_ref().map(|_| fit_score),
                params: model.params().clone(),
                score,
                confusion: (!classes.is_empty()).then(|| confusion_matrix(y_true, &predictions.labels)),
            });
        }

        let labels = labels
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| TrainingError::State("fold partition left examples without predictions".to_string()))?;
        Ok(CrossValidation { folds: outcomes, predictions: Predictions { labels, probabilities, classes } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Example;
    use crate::folds::FoldAssignment;
    use std::collections::BTreeMap;

    fn example(i: usize, label: &str, features: &[(&str, f64)]) -> Example {
        Example {
            id: format!("EXAMPLE_{i}"),
            label: Some(Label::from(label)),
            features: features.iter().map(|(k, v)| ((*k).to_string(), *v)).collect::<BTreeMap<_, _>>(),
        }
    }

    fn separable(n: usize) -> FeatureSet {
        let examples: Vec<Example> = (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    example(i, "yes", &[("a", 2.0 + (i % 5) as f64), ("b", 0.5)])
                } else {
                    example(i, "no", &[("b", 2.0 + (i % 3) as f64), ("c", 1.0)])
                }
            })
            .collect();
        FeatureSet::from_examples("toy", &examples).unwrap()
    }

    #[test]
    fn test_predict_before_train_is_state_error() {
        let learner = Learner::new(LearnerConfig::new(ModelKind::LogisticRegression)).unwrap();
        let fs = separable(10);
        assert!(learner.predict(&fs).unwrap_err().is_state());
        assert!(learner.evaluate(&fs, &[Objective::Accuracy]).unwrap_err().is_state());
    }

    #[test]
    fn test_probability_mode_requires_support() {
        let mut config = LearnerConfig::new(ModelKind::LinearSvc);
        config.probability = true;
        assert!(matches!(Learner::new(config), Err(TrainingError::Config(_))));
    }

    #[test]
    fn test_probability_objective_requires_probability_mode() {
        let mut learner = Learner::new(LearnerConfig::new(ModelKind::LogisticRegression)).unwrap();
        let err = learner.train(&separable(10), None, Objective::RocAuc, 1).unwrap_err();
        assert!(matches!(err, TrainingError::Config(_)));
    }

    #[test]
    fn test_train_with_grid_search_returns_grid_score() {
        let fs = separable(40);
        let mut learner = Learner::new(LearnerConfig::new(ModelKind::LogisticRegression)).unwrap();
        let score = learner.train(&fs, Some(FoldSpec::Count(3)), Objective::Accuracy, 2).unwrap();
        let model = learner.model().unwrap();
        let grid = model.grid().unwrap();
        assert_eq!(grid.best_score, score);
        assert_eq!(model.params(), &grid.best_params);
        assert!(score > 0.95);

        let predictions = learner.predict(&fs).unwrap();
        assert_eq!(predictions.len(), fs.len());
        assert!(predictions.probabilities.is_none());
    }

    #[test]
    fn test_retrain_replaces_model() {
        let fs = separable(20);
        let mut learner = Learner::new(LearnerConfig::new(ModelKind::MultinomialNb)).unwrap();
        learner.train(&fs, None, Objective::Accuracy, 1).unwrap();
        assert!(learner.model().unwrap().grid().is_none());
        learner.train(&fs, Some(FoldSpec::Count(2)), Objective::Accuracy, 1).unwrap();
        assert!(learner.model().unwrap().grid().is_some());
    }

    #[test]
    fn test_predict_ignores_unseen_features() {
        let fs = separable(20);
        let mut learner = Learner::new(LearnerConfig::new(ModelKind::LogisticRegression)).unwrap();
        learner.train(&fs, None, Objective::Accuracy, 1).unwrap();

        let test = FeatureSet::from_examples(
            "unseen",
            &[example(0, "yes", &[("a", 4.0), ("zzz", 100.0)]), example(1, "no", &[("b", 3.0), ("c", 1.0)])],
        )
        .unwrap();
        let predictions = learner.predict(&test).unwrap();
        assert_eq!(predictions.labels, vec![Label::from("yes"), Label::from("no")]);
    }

    #[test]
    fn test_evaluate_scores_each_metric_in_order() {
        let fs = separable(20);
        let mut config = LearnerConfig::new(ModelKind::LogisticRegression);
        config.probability = true;
        let mut learner = Learner::new(config).unwrap();
        learner.train(&fs, None, Objective::Accuracy, 1).unwrap();
        let scores = learner.evaluate(&fs, &[Objective::Accuracy, Objective::RocAuc]).unwrap();
        assert_eq!(scores[0].0, Objective::Accuracy);
        assert_eq!(scores[1].0, Objective::RocAuc);
        assert!(scores[1].1 > 0.95);
    }

    #[test]
    fn test_cross_validate_reassembles_predictions() {
        let fs = separable(30);
        let learner = Learner::new(LearnerConfig::new(ModelKind::MultinomialNb)).unwrap();
        let cv = learner
            .cross_validate(&fs, FoldSpec::Count(3), Objective::Accuracy, Some(FoldSpec::Count(2)), 1)
            .unwrap();
        assert_eq!(cv.folds.len(), 3);
        assert_eq!(cv.predictions.len(), fs.len());
        assert!(cv.folds.iter().all(|f| f.grid_score.is_some() && f.confusion.is_some()));
        assert_eq!(cv.folds.iter().map(|f| f.test_size).sum::<usize>(), fs.len());
        assert!(!learner.is_trained());
    }

    #[test]
    fn test_cross_validate_with_assigned_folds_restricts_inner_grid() {
        let fs = separable(12);
        let folds = FoldAssignment::from_pairs(fs.ids().iter().enumerate().map(|(i, id)| (id.clone(), i % 3))).unwrap();
        let learner = Learner::new(LearnerConfig::new(ModelKind::LogisticRegression)).unwrap();
        let cv = learner
            .cross_validate(
                &fs,
                FoldSpec::Assigned(folds.clone()),
                Objective::Accuracy,
                Some(FoldSpec::Assigned(folds)),
                1,
            )
            .unwrap();
        assert_eq!(cv.scores().len(), 3);
    }

    #[test]
    fn test_missing_fold_id_is_input_error() {
        let fs = separable(6);
        let folds = FoldAssignment::from_pairs(fs.ids()[..5].iter().enumerate().map(|(i, id)| (id.clone(), i % 2))).unwrap();
        let learner = Learner::new(LearnerConfig::new(ModelKind::LogisticRegression)).unwrap();
        let err = learner
            .cross_validate(&fs, FoldSpec::Assigned(folds), Objective::Accuracy, None, 1)
            .unwrap_err();
        assert!(err.is_input());
    }
}
