//! Feature matrices in dense or compressed sparse row form.
//!
//! Loaders build [`CsrMatrix`] directly from sparse example records; estimators
//! consume dense `ndarray` views. Column-level operations (non-zero counts,
//! stable column selection, row subsetting) are provided for both
//! representations and produce numerically identical results.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Compressed Sparse Row matrix.
///
/// For row `i`, the stored values are `data[indptr[i]..indptr[i + 1]]` with
/// column indices `indices[indptr[i]..indptr[i + 1]]`, sorted ascending.
/// Explicit zeros are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    /// Build from per-row `(column, value)` entries.
    ///
    /// Entries are sorted by column and zeros dropped. Column indices must be
    /// `< n_cols`.
    pub fn from_rows(n_cols: usize, rows: Vec<Vec<(usize, f64)>>) -> Self {
        let n_rows = rows.len();
        let mut indptr = Vec::with_capacity(n_rows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);

        for mut row in rows {
            row.sort_by_key(|(col, _)| *col);
            for (col, value) in row {
                debug_assert!(col < n_cols, "column {col} out of bounds ({n_cols})");
                if value != 0.0 {
                    indices.push(col);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }

        Self { n_rows, n_cols, indptr, indices, data }
    }

    pub fn from_dense(dense: &Array2<f64>) -> Self {
        let rows = dense
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, v)| **v != 0.0)
                    .map(|(c, v)| (c, *v))
                    .collect()
            })
            .collect();
        Self::from_rows(dense.ncols(), rows)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Non-zero entries of row `i` as `(column, value)` pairs.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let span = self.indptr[i]..self.indptr[i + 1];
        self.indices[span.clone()].iter().copied().zip(self.data[span].iter().copied())
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.n_rows, self.n_cols));
        for i in 0..self.n_rows {
            for (c, v) in self.row(i) {
                dense[[i, c]] = v;
            }
        }
        dense
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let selected = rows.iter().map(|&r| self.row(r).collect()).collect();
        Self::from_rows(self.n_cols, selected)
    }

    /// Keep `columns` (in the given order), renumbering them `0..columns.len()`.
    pub fn select_columns(&self, columns: &[usize]) -> Self {
        let mut remap = vec![None; self.n_cols];
        for (new, &old) in columns.iter().enumerate() {
            remap[old] = Some(new);
        }
        let rows = (0..self.n_rows)
            .map(|i| self.row(i).filter_map(|(c, v)| remap[c].map(|n| (n, v))).collect())
            .collect();
        Self::from_rows(columns.len(), rows)
    }

    pub fn column_nonzero_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_cols];
        for &c in &self.indices {
            counts[c] += 1;
        }
        counts
    }
}

/// A numeric feature matrix; rows are examples, columns are features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeatureMatrix {
    Dense(Array2<f64>),
    Sparse(CsrMatrix),
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        match self {
            Self::Dense(m) => m.nrows(),
            Self::Sparse(m) => m.n_rows(),
        }
    }

    pub fn n_cols(&self) -> usize {
        match self {
            Self::Dense(m) => m.ncols(),
            Self::Sparse(m) => m.n_cols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    /// Number of rows with a non-zero value, per column.
    pub fn column_nonzero_counts(&self) -> Vec<usize> {
        match self {
            Self::Dense(m) => m
                .axis_iter(Axis(1))
                .map(|col| col.iter().filter(|v| **v != 0.0).count())
                .collect(),
            Self::Sparse(m) => m.column_nonzero_counts(),
        }
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        match self {
            Self::Dense(m) => Self::Dense(m.select(Axis(0), rows)),
            Self::Sparse(m) => Self::Sparse(m.select_rows(rows)),
        }
    }

    pub fn select_columns(&self, columns: &[usize]) -> Self {
        match self {
            Self::Dense(m) => Self::Dense(m.select(Axis(1), columns)),
            Self::Sparse(m) => Self::Sparse(m.select_columns(columns)),
        }
    }

    /// Visit every non-zero entry as `(row, column, value)`.
    pub fn for_each_nonzero(&self, mut f: impl FnMut(usize, usize, f64)) {
        match self {
            Self::Dense(m) => {
                for ((r, c), v) in m.indexed_iter() {
                    if *v != 0.0 {
                        f(r, c, *v);
                    }
                }
            }
            Self::Sparse(m) => {
                for r in 0..m.n_rows() {
                    for (c, v) in m.row(r) {
                        f(r, c, v);
                    }
                }
            }
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(m) => m.clone(),
            Self::Sparse(m) => m.to_dense(),
        }
    }

    #[must_use]
    pub fn into_dense(self) -> Self {
        match self {
            Self::Dense(_) => self,
            Self::Sparse(m) => Self::Dense(m.to_dense()),
        }
    }

    #[must_use]
    pub fn into_sparse(self) -> Self {
        match self {
            Self::Dense(m) => Self::Sparse(CsrMatrix::from_dense(&m)),
            Self::Sparse(_) => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_csr_round_trips_through_dense() {
        let dense = array![[1.0, 0.0, 2.0], [0.0, 3.0, 0.0], [4.0, 0.0, 5.0]];
        let csr = CsrMatrix::from_dense(&dense);
        assert_eq!(csr.nnz(), 5);
        assert_eq!(csr.row(2).collect::<Vec<_>>(), vec![(0, 4.0), (2, 5.0)]);
        assert_eq!(csr.to_dense(), dense);
    }

    #[test]
    fn test_from_rows_drops_zeros_and_sorts() {
        let csr = CsrMatrix::from_rows(3, vec![vec![(2, 1.0), (0, 0.0), (1, -1.0)]]);
        assert_eq!(csr.row(0).collect::<Vec<_>>(), vec![(1, -1.0), (2, 1.0)]);
    }

    #[test]
    fn test_select_columns_matches_dense() {
        let dense = array![[1.0, 0.0, 2.0, 7.0], [0.0, 3.0, 0.0, 0.0]];
        let sparse = FeatureMatrix::Sparse(CsrMatrix::from_dense(&dense));
        let dense = FeatureMatrix::Dense(dense);

        let a = dense.select_columns(&[0, 3]).to_dense();
        let b = sparse.select_columns(&[0, 3]).to_dense();
        assert_eq!(a, b);
        assert_eq!(a, array![[1.0, 7.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_select_rows_and_counts() {
        let dense = array![[1.0, 0.0], [0.0, 3.0], [4.0, 0.0]];
        let sparse = FeatureMatrix::Sparse(CsrMatrix::from_dense(&dense));
        assert_eq!(sparse.column_nonzero_counts(), vec![2, 1]);
        assert_eq!(
            FeatureMatrix::Dense(dense).column_nonzero_counts(),
            sparse.column_nonzero_counts()
        );
        assert_eq!(sparse.select_rows(&[2, 0]).to_dense(), array![[4.0, 0.0], [1.0, 0.0]]);
    }
}
