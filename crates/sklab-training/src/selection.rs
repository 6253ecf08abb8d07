use crate::error::{TrainingError, TrainingResult};
use crate::matrix::FeatureMatrix;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Keeps columns that are non-zero in at least `min_count` rows.
///
/// Retained columns keep their relative order. A `min_count` above the number
/// of rows selects nothing and yields a zero-column matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectByMinCount {
    min_count: usize,
    support: Option<Vec<usize>>,
}

impl Default for SelectByMinCount {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SelectByMinCount {
    #[must_use]
    pub fn new(min_count: usize) -> Self {
        Self { min_count, support: None }
    }

    pub fn min_count(&self) -> usize {
        self.min_count
    }

    /// Indices of the retained columns, once fitted.
    pub fn support(&self) -> Option<&[usize]> {
        self.support.as_deref()
    }

    pub fn fit(&mut self, matrix: &FeatureMatrix) -> &mut Self {
        let support = matrix
            .column_nonzero_counts()
            .into_iter()
            .enumerate()
            .filter(|(_, count)| *count >= self.min_count)
            .map(|(col, _)| col)
            .collect();
        self.support = Some(support);
        self
    }

    pub fn transform(&self, matrix: &FeatureMatrix) -> TrainingResult<FeatureMatrix> {
        let support = self
            .support
            .as_ref()
            .ok_or_else(|| TrainingError::State("feature selector used before fit".to_string()))?;
        if let Some(&max) = support.last() {
            if max >= matrix.n_cols() {
                return Err(TrainingError::input(format!(
                    "selector was fitted on at least {} columns but matrix has {}",
                    max + 1,
                    matrix.n_cols()
                )));
            }
        }
        Ok(matrix.select_columns(support))
    }

    pub fn fit_transform(&mut self, matrix: &FeatureMatrix) -> TrainingResult<FeatureMatrix> {
        self.fit(matrix).transform(matrix)
    }
}

/// Per-column standardization applied after selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureScaling {
    #[default]
    None,
    WithStd,
    WithMean,
    Both,
}

impl FeatureScaling {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "unscaled",
            Self::WithStd => "with_std",
            Self::WithMean => "with_mean",
            Self::Both => "scaled",
        }
    }

    fn centers(self) -> bool {
        matches!(self, Self::WithMean | Self::Both)
    }

    fn divides(self) -> bool {
        matches!(self, Self::WithStd | Self::Both)
    }
}

/// Column means and standard deviations learned from training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    scaling: FeatureScaling,
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Scaler {
    pub fn fit(scaling: FeatureScaling, x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let means: Vec<f64> = x.axis_iter(Axis(1)).map(|c| c.sum() / n).collect();
        let stds = x
            .axis_iter(Axis(1))
            .zip(&means)
            .map(|(c, m)| {
                let std = (c.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n).sqrt();
                if std > 0.0 { std } else { 1.0 }
            })
            .collect();
        Self { scaling, means, stds }
    }

    pub fn transform(&self, x: &mut Array2<f64>) {
        for (mut col, (mean, std)) in x.axis_iter_mut(Axis(1)).zip(self.means.iter().zip(&self.stds)) {
            if self.scaling.centers() {
                col -= *mean;
            }
            if self.scaling.divides() {
                col /= *std;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use ndarray::array;

    fn m2() -> Array2<f64> {
        array![
            [0.001, 0.0, 0.0, 0.0],
            [0.00001, -2.0, 0.0, 0.0],
            [0.001, 0.0, 0.0, 4.0],
            [0.0101, -200.0, 0.0, 0.0],
        ]
    }

    fn check(min_count: usize, expected: &Array2<f64>) {
        let dense = FeatureMatrix::Dense(m2());
        let sparse = FeatureMatrix::Sparse(CsrMatrix::from_dense(&m2()));
        assert_eq!(&SelectByMinCount::new(min_count).fit_transform(&dense).unwrap().to_dense(), expected);
        assert_eq!(&SelectByMinCount::new(min_count).fit_transform(&sparse).unwrap().to_dense(), expected);
    }

    #[test]
    fn test_select_by_min_count_default_keeps_nonzero_columns() {
        check(
            1,
            &array![[0.001, 0.0, 0.0], [0.00001, -2.0, 0.0], [0.001, 0.0, 4.0], [0.0101, -200.0, 0.0]],
        );
        assert_eq!(SelectByMinCount::default().min_count(), 1);
    }

    #[test]
    fn test_select_by_min_count_two_and_three() {
        check(2, &array![[0.001, 0.0], [0.00001, -2.0], [0.001, 0.0], [0.0101, -200.0]]);
        check(3, &array![[0.001], [0.00001], [0.001], [0.0101]]);
    }

    #[test]
    fn test_select_by_min_count_above_row_count_is_empty() {
        let mut selector = SelectByMinCount::new(10);
        let out = selector.fit_transform(&FeatureMatrix::Dense(m2())).unwrap();
        assert_eq!(out.n_rows(), 4);
        assert_eq!(out.n_cols(), 0);
    }

    #[test]
    fn test_transform_before_fit_is_state_error() {
        let err = SelectByMinCount::new(1).transform(&FeatureMatrix::Dense(m2())).unwrap_err();
        assert!(err.is_state());
    }

    #[test]
    fn test_scaler_both() {
        let mut x = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = Scaler::fit(FeatureScaling::Both, &x);
        scaler.transform(&mut x);
        assert_eq!(x, array![[-1.0, 0.0], [1.0, 0.0]]);
    }
}
