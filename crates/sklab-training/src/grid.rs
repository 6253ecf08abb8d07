//! Exhaustive hyperparameter search scored by cross-validation.
//!
//! Every `(grid point, inner split)` pair is an independent task run on a
//! dedicated rayon pool sized by `jobs`. Workers only read the training data;
//! the first failing task (in enumeration order) aborts the search.

use crate::error::{TrainingError, TrainingResult};
use crate::estimators::HyperParams;
use crate::folds::Split;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Cross-validated scores for one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPointScore {
    pub params: HyperParams,
    /// One score per inner split, in split order.
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchOutcome {
    pub best_params: HyperParams,
    pub best_score: f64,
    /// All points in grid enumeration order.
    pub points: Vec<GridPointScore>,
}

/// Score every grid point on every split and pick the best mean.
///
/// Ties go to the earliest point in `grid`. `score` fits on `split.train` and
/// returns the objective on `split.test`.
pub fn grid_search<F>(grid: &[HyperParams], splits: &[Split], jobs: usize, score: F) -> TrainingResult<GridSearchOutcome>
where
    F: Fn(&HyperParams, &Split) -> TrainingResult<f64> + Sync,
{
    if grid.is_empty() {
        return Err(TrainingError::Config("hyperparameter grid is empty".to_string()));
    }
    if splits.is_empty() {
        return Err(TrainingError::input("grid search needs at least one split"));
    }

    let tasks: Vec<(usize, usize)> =
        (0..grid.len()).flat_map(|p| (0..splits.len()).map(move |s| (p, s))).collect();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(anyhow::Error::from)?;
    tracing::debug!(points = grid.len(), splits = splits.len(), jobs, "starting grid search");

    let results: Vec<TrainingResult<f64>> = pool.install(|| {
        tasks
            .par_iter()
            .map(|&(p, s)| {
                score(&grid[p], &splits[s]).map_err(|source| TrainingError::GridSearch {
                    params: grid[p].to_string(),
                    fold: splits[s].fold,
                    source: Box::new(source),
                })
            })
            .collect()
    });

    let mut scores = Vec::with_capacity(results.len());
    for result in results {
        scores.push(result?);
    }

    let points: Vec<GridPointScore> = grid
        .iter()
        .zip(scores.chunks(splits.len()))
        .map(|(params, fold_scores)| {
            let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
            tracing::debug!(%params, mean_score, "grid point scored");
            GridPointScore { params: params.clone(), fold_scores: fold_scores.to_vec(), mean_score }
        })
        .collect();

    let mut best = 0;
    for (i, point) in points.iter().enumerate().skip(1) {
        if point.mean_score > points[best].mean_score || points[best].mean_score.is_nan() {
            best = i;
        }
    }
    Ok(GridSearchOutcome {
        best_params: points[best].params.clone(),
        best_score: points[best].mean_score,
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splits(n: usize) -> Vec<Split> {
        (0..n).map(|fold| Split { fold, train: vec![], test: vec![] }).collect()
    }

    #[test]
    fn test_best_mean_wins() {
        let grid = HyperParams::grid("C", &[0.1, 1.0, 10.0]);
        let outcome = grid_search(&grid, &splits(3), 2, |params, split| {
            let c = params.get("C").unwrap_or_default();
            Ok(if c == 1.0 { 0.9 } else { 0.5 } + split.fold as f64 * 0.01)
        })
        .unwrap();
        assert_eq!(outcome.best_params.get("C"), Some(1.0));
        assert!((outcome.best_score - 0.91).abs() < 1e-12);
        assert_eq!(outcome.points.len(), 3);
        assert_eq!(outcome.points[0].fold_scores.len(), 3);
    }

    #[test]
    fn test_ties_go_to_first_point() {
        let grid = HyperParams::grid("alpha", &[0.5, 1.0]);
        let outcome = grid_search(&grid, &splits(2), 4, |_, _| Ok(0.7)).unwrap();
        assert_eq!(outcome.best_params.get("alpha"), Some(0.5));
    }

    #[test]
    fn test_worker_failure_names_point_and_fold() {
        let grid = HyperParams::grid("C", &[0.1, 1.0]);
        let err = grid_search(&grid, &splits(3), 3, |params, split| {
            if params.get("C") == Some(1.0) && split.fold == 2 {
                Err(TrainingError::Estimator("diverged".to_string()))
            } else {
                Ok(0.5)
            }
        })
        .unwrap_err();
        match err {
            TrainingError::GridSearch { params, fold, .. } => {
                assert_eq!(params, "C=1");
                assert_eq!(fold, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_grid_is_config_error() {
        let err = grid_search(&[], &splits(2), 1, |_, _| Ok(0.0)).unwrap_err();
        assert!(matches!(err, TrainingError::Config(_)));
    }
}
