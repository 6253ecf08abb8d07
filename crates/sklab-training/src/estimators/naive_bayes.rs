use super::linalg::{argmax, softmax};
use super::{Estimator, FittedModel, HyperParams, ModelKind, RawOutput, Targets};
use crate::error::{TrainingError, TrainingResult};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Multinomial naive Bayes with additive (Lidstone) smoothing.
///
/// Features are treated as counts and must be non-negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultinomialNb;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    class_log_prior: Vec<f64>,
    /// `(n_classes, n_features)`
    feature_log_prob: Array2<f64>,
}

impl NaiveBayesModel {
    pub fn n_features(&self) -> usize {
        self.feature_log_prob.ncols()
    }

    pub(crate) fn predict(&self, x: &Array2<f64>) -> RawOutput {
        let mut joint = x.dot(&self.feature_log_prob.t());
        for (mut col, prior) in joint.axis_iter_mut(Axis(1)).zip(&self.class_log_prior) {
            col += *prior;
        }
        let indices = joint.axis_iter(Axis(0)).map(argmax).collect();
        for mut row in joint.axis_iter_mut(Axis(0)) {
            if let Some(slice) = row.as_slice_mut() {
                softmax(slice);
            }
        }
        RawOutput::Classes { indices, probabilities: Some(joint) }
    }
}

impl Estimator for MultinomialNb {
    fn kind(&self) -> ModelKind {
        ModelKind::MultinomialNb
    }

    fn default_params(&self) -> HyperParams {
        HyperParams::default().with("alpha", 1.0)
    }

    fn param_grid(&self) -> Vec<HyperParams> {
        HyperParams::grid("alpha", &[0.1, 0.25, 0.5, 0.75, 1.0])
    }

    fn supports_probabilities(&self) -> bool {
        true
    }

    fn fit(&self, x: &Array2<f64>, targets: &Targets, params: &HyperParams) -> TrainingResult<FittedModel> {
        let alpha = params.require("alpha")?;
        let (y, n_classes) = targets.classes()?;
        if x.iter().any(|v| *v < 0.0) {
            return Err(TrainingError::input("MultinomialNB requires non-negative feature values"));
        }

        let d = x.ncols();
        let mut counts = Array2::<f64>::zeros((n_classes, d));
        let mut class_counts = vec![0.0; n_classes];
        for (row, &class) in x.axis_iter(Axis(0)).zip(y) {
            let mut acc = counts.row_mut(class);
            acc += &row;
            class_counts[class] += 1.0;
        }

        let n = y.len() as f64;
        let class_log_prior = class_counts.iter().map(|c| (c / n).ln()).collect();
        let mut feature_log_prob = counts.clone();
        for (k, mut row) in feature_log_prob.axis_iter_mut(Axis(0)).enumerate() {
            let total = counts.row(k).sum() + alpha * d as f64;
            row.mapv_inplace(|c| ((c + alpha) / total).ln());
        }

        Ok(FittedModel::NaiveBayes(NaiveBayesModel { class_log_prior, feature_log_prob }))
    }
}
