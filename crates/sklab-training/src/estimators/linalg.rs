//! Small dense solvers used by the estimator families.

use crate::error::{TrainingError, TrainingResult};
use faer::linalg::solvers::Solve;
use faer::{Mat, Side};
use ndarray::{Array1, Array2, ArrayView1};

/// Solve `a · x = b` for symmetric positive-definite `a` via Cholesky.
pub(crate) fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> TrainingResult<Array1<f64>> {
    let (rows, cols) = a.dim();
    let lhs = Mat::from_fn(rows, cols, |i, j| a[[i, j]]);
    let rhs = Mat::from_fn(b.len(), 1, |i, _| b[i]);
    let llt = lhs
        .as_ref()
        .llt(Side::Lower)
        .map_err(|err| TrainingError::Estimator(format!("matrix is not positive definite: {err:?}")))?;
    let x = llt.solve(rhs.as_ref());
    let solution = Array1::from_shape_fn(x.nrows(), |i| x[(i, 0)]);
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(TrainingError::Estimator("Cholesky solve produced non-finite values".to_string()));
    }
    Ok(solution)
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
pub(crate) fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

/// In-place softmax of a row of log-scores.
pub(crate) fn softmax(scores: &mut [f64]) {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        total += *s;
    }
    for s in scores.iter_mut() {
        *s /= total;
    }
}

pub(crate) fn argmax(values: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
