use super::linalg::{argmax, sigmoid, softplus, solve_spd};
use super::{Estimator, FittedModel, HyperParams, ModelKind, RawOutput, Targets};
use crate::error::{TrainingError, TrainingResult};
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

const C_GRID: [f64; 5] = [0.01, 0.1, 1.0, 10.0, 100.0];

/// Linear decision functions, one per class (or a single one for binary tasks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    /// `(n_models, n_features)`; `n_models` is 1 for binary problems.
    weights: Array2<f64>,
    intercepts: Vec<f64>,
    n_classes: usize,
    /// Logistic models expose probabilities; hinge-loss models do not.
    probabilistic: bool,
}

impl LinearClassifier {
    pub fn n_features(&self) -> usize {
        self.weights.ncols()
    }

    fn decision(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut scores = x.dot(&self.weights.t());
        for (mut col, b) in scores.axis_iter_mut(Axis(1)).zip(&self.intercepts) {
            col += *b;
        }
        scores
    }

    pub(crate) fn predict(&self, x: &Array2<f64>) -> RawOutput {
        let scores = self.decision(x);
        let binary = self.n_classes == 2;

        let probabilities = self.probabilistic.then(|| {
            let mut probs = Array2::<f64>::zeros((x.nrows(), self.n_classes));
            for (i, row) in scores.axis_iter(Axis(0)).enumerate() {
                if binary {
                    let p = sigmoid(row[0]);
                    probs[[i, 0]] = 1.0 - p;
                    probs[[i, 1]] = p;
                } else {
                    // one-vs-rest probabilities, renormalized
                    let total: f64 = row.iter().map(|z| sigmoid(*z)).sum();
                    for (k, z) in row.iter().enumerate() {
                        probs[[i, k]] = sigmoid(*z) / total;
                    }
                }
            }
            probs
        });

        let indices = scores
            .axis_iter(Axis(0))
            .map(|row| if binary { usize::from(row[0] > 0.0) } else { argmax(row) })
            .collect();
        RawOutput::Classes { indices, probabilities }
    }
}

/// Binary targets for each one-vs-rest model (a single model when binary).
fn ovr_targets(y: &[usize], n_classes: usize) -> Vec<Vec<f64>> {
    let positives: Vec<usize> = if n_classes == 2 { vec![1] } else { (0..n_classes).collect() };
    positives
        .into_iter()
        .map(|k| y.iter().map(|&c| f64::from(u8::from(c == k))).collect())
        .collect()
}

fn with_bias_column(x: &Array2<f64>) -> Array2<f64> {
    let mut aug = Array2::<f64>::ones((x.nrows(), x.ncols() + 1));
    aug.slice_mut(s![.., ..x.ncols()]).assign(x);
    aug
}

fn fit_ovr(
    x: &Array2<f64>,
    targets: &Targets,
    probabilistic: bool,
    fit_binary: impl Fn(&Array2<f64>, &[f64]) -> TrainingResult<Array1<f64>>,
) -> TrainingResult<LinearClassifier> {
    let (y, n_classes) = targets.classes()?;
    let aug = with_bias_column(x);
    let d = x.ncols();

    let models = ovr_targets(y, n_classes);
    let mut weights = Array2::<f64>::zeros((models.len(), d));
    let mut intercepts = Vec::with_capacity(models.len());
    for (k, t) in models.iter().enumerate() {
        let theta = fit_binary(&aug, t)?;
        weights.row_mut(k).assign(&theta.slice(s![..d]));
        intercepts.push(theta[d]);
    }
    Ok(LinearClassifier { weights, intercepts, n_classes, probabilistic })
}

/// L2-regularized logistic regression (one-vs-rest for multiclass).
///
/// Minimizes `C · Σ logloss + ½‖w‖²` with an unpenalized intercept using
/// damped Newton iterations.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticRegression;

impl LogisticRegression {
    const MAX_ITER: usize = 100;
    const TOL: f64 = 1e-9;

    fn objective(aug: &Array2<f64>, t: &[f64], theta: &Array1<f64>, c: f64) -> f64 {
        let d = theta.len() - 1;
        let z = aug.dot(theta);
        let loss: f64 = z.iter().zip(t).map(|(z, t)| softplus(*z) - t * z).sum();
        c * loss + 0.5 * theta.slice(s![..d]).dot(&theta.slice(s![..d]))
    }

    fn fit_binary(aug: &Array2<f64>, t: &[f64], c: f64) -> TrainingResult<Array1<f64>> {
        let dim = aug.ncols();
        let d = dim - 1;
        let mut theta = Array1::<f64>::zeros(dim);
        let mut current = Self::objective(aug, t, &theta, c);

        for _ in 0..Self::MAX_ITER {
            let z = aug.dot(&theta);
            let p: Array1<f64> = z.mapv(sigmoid);
            let residual: Array1<f64> = p.iter().zip(t).map(|(p, t)| p - t).collect();

            let mut grad = aug.t().dot(&residual) * c;
            let mut hess_weight: Array1<f64> = p.mapv(|p| (c * p * (1.0 - p)).sqrt());
            hess_weight.mapv_inplace(|w| if w.is_finite() { w } else { 0.0 });
            let scaled = aug * &hess_weight.insert_axis(Axis(1));
            let mut hess = scaled.t().dot(&scaled);
            for j in 0..d {
                grad[j] += theta[j];
                hess[[j, j]] += 1.0;
            }
            hess[[d, d]] += 1e-8;

            let step = solve_spd(&hess, &grad)?;
            let mut rate = 1.0;
            let mut accepted = false;
            for _ in 0..30 {
                let candidate = &theta - &(&step * rate);
                let value = Self::objective(aug, t, &candidate, c);
                if value <= current {
                    theta = candidate;
                    current = value;
                    accepted = true;
                    break;
                }
                rate *= 0.5;
            }
            let size = step.iter().fold(0.0_f64, |m, v| m.max(v.abs())) * rate;
            if !accepted || size < Self::TOL {
                break;
            }
        }

        if theta.iter().any(|v| !v.is_finite()) {
            return Err(TrainingError::Estimator("logistic regression diverged".to_string()));
        }
        Ok(theta)
    }
}

impl Estimator for LogisticRegression {
    fn kind(&self) -> ModelKind {
        ModelKind::LogisticRegression
    }

    fn default_params(&self) -> HyperParams {
        HyperParams::default().with("C", 1.0)
    }

    fn param_grid(&self) -> Vec<HyperParams> {
        HyperParams::grid("C", &C_GRID)
    }

    fn supports_probabilities(&self) -> bool {
        true
    }

    fn fit(&self, x: &Array2<f64>, targets: &Targets, params: &HyperParams) -> TrainingResult<FittedModel> {
        let c = params.require("C")?;
        let model = fit_ovr(x, targets, true, |aug, t| Self::fit_binary(aug, t, c))?;
        Ok(FittedModel::Linear(model))
    }
}

/// Linear support vector classifier (hinge loss, dual coordinate descent).
///
/// The intercept is learned as the weight of a constant feature and is
/// therefore regularized. Coordinates are visited in a seeded random order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearSvc;

impl LinearSvc {
    const MAX_PASSES: usize = 1000;
    const EPS: f64 = 1e-3;
    const SEED: u64 = 0;

    fn fit_binary(aug: &Array2<f64>, t: &[f64], c: f64) -> Array1<f64> {
        let n = aug.nrows();
        let signs: Vec<f64> = t.iter().map(|t| if *t > 0.0 { 1.0 } else { -1.0 }).collect();
        let q_diag: Vec<f64> = aug.axis_iter(Axis(0)).map(|r| r.dot(&r)).collect();
        let mut alpha = vec![0.0; n];
        let mut w = Array1::<f64>::zeros(aug.ncols());
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(Self::SEED);

        for _ in 0..Self::MAX_PASSES {
            order.shuffle(&mut rng);
            let mut pg_max = f64::NEG_INFINITY;
            let mut pg_min = f64::INFINITY;

            for &i in &order {
                let xi = aug.row(i);
                let g = signs[i] * w.dot(&xi) - 1.0;
                let pg = if alpha[i] == 0.0 {
                    g.min(0.0)
                } else if alpha[i] == c {
                    g.max(0.0)
                } else {
                    g
                };
                pg_max = pg_max.max(pg);
                pg_min = pg_min.min(pg);

                if pg.abs() > 1e-12 && q_diag[i] > 0.0 {
                    let old = alpha[i];
                    alpha[i] = (old - g / q_diag[i]).clamp(0.0, c);
                    w.scaled_add((alpha[i] - old) * signs[i], &xi);
                }
            }

            if pg_max - pg_min < Self::EPS {
                break;
            }
        }
        w
    }
}

impl Estimator for LinearSvc {
    fn kind(&self) -> ModelKind {
        ModelKind::LinearSvc
    }

    fn default_params(&self) -> HyperParams {
        HyperParams::default().with("C", 1.0)
    }

    fn param_grid(&self) -> Vec<HyperParams> {
        HyperParams::grid("C", &C_GRID)
    }

    fn supports_probabilities(&self) -> bool {
        false
    }

    fn fit(&self, x: &Array2<f64>, targets: &Targets, params: &HyperParams) -> TrainingResult<FittedModel> {
        let c = params.require("C")?;
        let model = fit_ovr(x, targets, false, |aug, t| Ok(Self::fit_binary(aug, t, c)))?;
        Ok(FittedModel::Linear(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Targets) {
        let x = array![[0.0, 1.0], [0.2, 0.9], [0.1, 1.2], [1.0, 0.0], [0.9, 0.2], [1.2, 0.1]];
        (x, Targets::Classes { y: vec![0, 0, 0, 1, 1, 1], n_classes: 2 })
    }

    fn three_class() -> (Array2<f64>, Targets) {
        let x = array![
            [1.0, 0.0, 0.0],
            [0.9, 0.1, 0.0],
            [0.0, 1.0, 0.0],
            [0.1, 0.9, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.1, 0.9]
        ];
        (x, Targets::Classes { y: vec![0, 0, 1, 1, 2, 2], n_classes: 3 })
    }

    fn indices(output: RawOutput) -> Vec<usize> {
        match output {
            RawOutput::Classes { indices, .. } => indices,
            RawOutput::Values(_) => panic!("expected classes"),
        }
    }

    #[test]
    fn test_logistic_fits_separable_data() {
        let (x, targets) = separable();
        let model = LogisticRegression.fit(&x, &targets, &HyperParams::default().with("C", 10.0)).unwrap();
        let RawOutput::Classes { indices, probabilities } = model.predict(&x) else {
            panic!("expected classes");
        };
        assert_eq!(indices, vec![0, 0, 0, 1, 1, 1]);
        let probs = probabilities.unwrap();
        for row in probs.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!(probs[[0, 0]] > 0.5);
    }

    #[test]
    fn test_logistic_multiclass() {
        let (x, targets) = three_class();
        let model = LogisticRegression.fit(&x, &targets, &HyperParams::default().with("C", 100.0)).unwrap();
        assert_eq!(indices(model.predict(&x)), vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_linear_svc_binary_and_multiclass() {
        let (x, targets) = separable();
        let model = LinearSvc.fit(&x, &targets, &LinearSvc.default_params()).unwrap();
        let RawOutput::Classes { indices, probabilities } = model.predict(&x) else {
            panic!("expected classes");
        };
        assert_eq!(indices, vec![0, 0, 0, 1, 1, 1]);
        assert!(probabilities.is_none());

        let (x, targets) = three_class();
        let model = LinearSvc.fit(&x, &targets, &HyperParams::default().with("C", 10.0)).unwrap();
        assert_eq!(self::indices(model.predict(&x)), vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_single_class_rejected() {
        let x = array![[1.0], [2.0]];
        let targets = Targets::Classes { y: vec![0, 0], n_classes: 1 };
        assert!(LogisticRegression.fit(&x, &targets, &LogisticRegression.default_params()).is_err());
    }
}
