use super::linalg::solve_spd;
use super::{Estimator, FittedModel, HyperParams, ModelKind, Targets};
use crate::error::TrainingResult;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Ridge regression solved in closed form on centered data.
///
/// With `rescale`, predictions are standardized against the training
/// predictions, mapped onto the training target's mean and standard deviation
/// and clipped to the training target range.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ridge {
    pub rescale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rescaling {
    pred_mean: f64,
    pred_std: f64,
    y_mean: f64,
    y_std: f64,
    y_min: f64,
    y_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    coef: Array1<f64>,
    intercept: f64,
    rescaling: Option<Rescaling>,
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

impl RidgeModel {
    pub fn n_features(&self) -> usize {
        self.coef.len()
    }

    fn raw(&self, x: &Array2<f64>) -> Vec<f64> {
        (x.dot(&self.coef) + self.intercept).to_vec()
    }

    pub(crate) fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        let raw = self.raw(x);
        let Some(r) = &self.rescaling else {
            return raw;
        };
        raw.into_iter()
            .map(|p| {
                let z = if r.pred_std > 0.0 { (p - r.pred_mean) / r.pred_std } else { 0.0 };
                (z * r.y_std + r.y_mean).clamp(r.y_min, r.y_max)
            })
            .collect()
    }
}

impl Estimator for Ridge {
    fn kind(&self) -> ModelKind {
        if self.rescale { ModelKind::RescaledRidge } else { ModelKind::Ridge }
    }

    fn default_params(&self) -> HyperParams {
        HyperParams::default().with("alpha", 1.0)
    }

    fn param_grid(&self) -> Vec<HyperParams> {
        HyperParams::grid("alpha", &[0.01, 0.1, 1.0, 10.0, 100.0])
    }

    fn supports_probabilities(&self) -> bool {
        false
    }

    fn fit(&self, x: &Array2<f64>, targets: &Targets, params: &HyperParams) -> TrainingResult<FittedModel> {
        let alpha = params.require("alpha")?;
        let y = targets.values()?;
        let d = x.ncols();

        let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let (y_mean, y_std) = mean_std(y);
        let xc = x - &x_mean;
        let yc: Array1<f64> = y.iter().map(|v| v - y_mean).collect();

        let mut gram = xc.t().dot(&xc);
        for j in 0..d {
            gram[[j, j]] += alpha;
        }
        let coef = solve_spd(&gram, &xc.t().dot(&yc))?;
        let intercept = y_mean - x_mean.dot(&coef);

        let mut model = RidgeModel { coef, intercept, rescaling: None };
        if self.rescale {
            let (pred_mean, pred_std) = mean_std(&model.raw(x));
            let y_min = y.iter().copied().fold(f64::INFINITY, f64::min);
            let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            model.rescaling = Some(Rescaling { pred_mean, pred_std, y_mean, y_std, y_min, y_max });
        }
        Ok(FittedModel::Ridge(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_ridge_recovers_linear_relation() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [2.0, 1.0], [0.5, 2.0]];
        let y: Vec<f64> = x.axis_iter(Axis(0)).map(|r| 3.0 * r[0] - 2.0 * r[1] + 1.0).collect();
        let model = Ridge { rescale: false }
            .fit(&x, &Targets::Values(y.clone()), &HyperParams::default().with("alpha", 1e-9))
            .unwrap();
        let FittedModel::Ridge(model) = model else { panic!("expected ridge") };
        for (p, t) in model.predict(&x).iter().zip(&y) {
            assert_abs_diff_eq!(*p, *t, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rescaled_ridge_stays_in_training_range() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = vec![0.0, 1.0, 2.0, 3.0];
        let FittedModel::Ridge(model) = (Ridge { rescale: true })
            .fit(&x, &Targets::Values(y), &HyperParams::default().with("alpha", 100.0))
            .unwrap()
        else {
            panic!("expected ridge");
        };
        let preds = model.predict(&array![[-10.0], [1.5], [10.0]]);
        assert_abs_diff_eq!(preds[0], 0.0);
        assert_abs_diff_eq!(preds[1], 1.5, epsilon = 1e-9);
        assert_abs_diff_eq!(preds[2], 3.0);
    }

    #[test]
    fn test_ridge_with_no_features_predicts_mean() {
        let x = Array2::<f64>::zeros((3, 0));
        let FittedModel::Ridge(model) = (Ridge { rescale: false })
            .fit(&x, &Targets::Values(vec![1.0, 2.0, 3.0]), &HyperParams::default().with("alpha", 1.0))
            .unwrap()
        else {
            panic!("expected ridge");
        };
        assert_eq!(model.predict(&x), vec![2.0, 2.0, 2.0]);
    }
}
