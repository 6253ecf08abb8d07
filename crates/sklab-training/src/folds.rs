//! Fold assignments for cross-validation and grid search.
//!
//! A [`FoldAssignment`] maps example ids to fold numbers. It is either
//! synthesized from a seed (a pure function of `(ids, k, seed)`) or loaded
//! verbatim from an `id,fold` table.

use crate::dataset::{FeatureSet, Label};
use crate::error::{TrainingError, TrainingResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Default seed for synthesized folds.
pub const DEFAULT_SEED: u64 = 123_456_789;

/// Mapping from example id to fold number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldAssignment {
    folds: HashMap<String, usize>,
}

/// One train/held-out split, as row indices into a featureset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub fold: usize,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// How a fold partition is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoldSpec {
    /// Synthesize `k` folds from the examples at hand.
    Count(usize),
    /// Use an explicit assignment, restricted to the examples at hand.
    Assigned(FoldAssignment),
}

impl From<usize> for FoldSpec {
    fn from(k: usize) -> Self {
        Self::Count(k)
    }
}

impl From<FoldAssignment> for FoldSpec {
    fn from(folds: FoldAssignment) -> Self {
        Self::Assigned(folds)
    }
}

impl FoldAssignment {
    pub fn from_pairs<I, S>(pairs: I) -> TrainingResult<Self>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut folds = HashMap::new();
        for (id, fold) in pairs {
            let id = id.into();
            if let Some(previous) = folds.insert(id.clone(), fold) {
                if previous != fold {
                    return Err(TrainingError::input(format!(
                        "id '{id}' is assigned to both fold {previous} and fold {fold}"
                    )));
                }
            }
        }
        Ok(Self { folds })
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    pub fn fold_of(&self, id: &str) -> Option<usize> {
        self.folds.get(id).copied()
    }

    /// Distinct fold numbers, ascending.
    pub fn fold_numbers(&self) -> Vec<usize> {
        self.folds.values().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub fn num_folds(&self) -> usize {
        self.fold_numbers().len()
    }

    /// Keep only the given ids. Every id must be assigned.
    pub fn restrict<S: AsRef<str>>(&self, ids: &[S]) -> TrainingResult<Self> {
        let mut folds = HashMap::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref();
            let fold = self.fold_of(id).ok_or_else(|| missing_id(id))?;
            folds.insert(id.to_string(), fold);
        }
        Ok(Self { folds })
    }

    /// Train/held-out splits over `ids`, one per fold number present among them.
    ///
    /// Fails if any id has no assignment or fewer than two folds remain.
    pub fn splits<S: AsRef<str>>(&self, ids: &[S]) -> TrainingResult<Vec<Split>> {
        let mut by_fold: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, id) in ids.iter().enumerate() {
            let id = id.as_ref();
            let fold = self.fold_of(id).ok_or_else(|| missing_id(id))?;
            by_fold.entry(fold).or_default().push(row);
        }
        if by_fold.len() < 2 {
            return Err(TrainingError::input(format!(
                "cross-validation needs at least 2 folds, found {} among {} examples",
                by_fold.len(),
                ids.len()
            )));
        }

        let row_fold: Vec<usize> = ids
            .iter()
            .map(|id| self.fold_of(id.as_ref()).unwrap_or_default())
            .collect();
        Ok(by_fold
            .into_iter()
            .map(|(fold, test)| Split {
                fold,
                train: (0..ids.len()).filter(|&r| row_fold[r] != fold).collect(),
                test,
            })
            .collect())
    }
}

fn missing_id(id: &str) -> TrainingError {
    TrainingError::input(format!("id '{id}' has no fold assignment"))
}

fn check_k(n: usize, k: usize) -> TrainingResult<()> {
    if k < 2 {
        return Err(TrainingError::input(format!("number of folds must be >= 2, got {k}")));
    }
    if n < k {
        return Err(TrainingError::input(format!("cannot split {n} examples into {k} folds")));
    }
    Ok(())
}

/// Shuffle `ids` with `seed` and deal them into `k` contiguous, near-equal folds.
pub fn make_folds<S: AsRef<str>>(ids: &[S], k: usize, seed: u64) -> TrainingResult<FoldAssignment> {
    check_k(ids.len(), k)?;
    let mut order: Vec<usize> = (0..ids.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let base = ids.len() / k;
    let remainder = ids.len() % k;
    let mut folds = HashMap::with_capacity(ids.len());
    let mut start = 0;
    for fold in 0..k {
        let end = start + base + usize::from(fold < remainder);
        for &row in &order[start..end] {
            folds.insert(ids[row].as_ref().to_string(), fold);
        }
        start = end;
    }
    Ok(FoldAssignment { folds })
}

/// Like [`make_folds`], but deals each label's examples round-robin so every
/// fold keeps roughly the overall class proportions.
pub fn make_stratified_folds<S: AsRef<str>>(
    ids: &[S],
    labels: &[Label],
    k: usize,
    seed: u64,
) -> TrainingResult<FoldAssignment> {
    check_k(ids.len(), k)?;
    if ids.len() != labels.len() {
        return Err(TrainingError::input(format!("{} ids but {} labels", ids.len(), labels.len())));
    }

    let mut by_label: BTreeMap<&Label, Vec<usize>> = BTreeMap::new();
    for (row, label) in labels.iter().enumerate() {
        by_label.entry(label).or_default().push(row);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds = HashMap::with_capacity(ids.len());
    let mut next = 0;
    for rows in by_label.values_mut() {
        rows.shuffle(&mut rng);
        for &row in rows.iter() {
            folds.insert(ids[row].as_ref().to_string(), next % k);
            next += 1;
        }
    }
    Ok(FoldAssignment { folds })
}

/// Synthesize folds for a featureset: stratified when `stratify` and labels are present.
pub fn folds_for(featureset: &FeatureSet, k: usize, seed: u64, stratify: bool) -> TrainingResult<FoldAssignment> {
    match featureset.labels() {
        Some(labels) if stratify => make_stratified_folds(featureset.ids(), labels, k, seed),
        _ => make_folds(featureset.ids(), k, seed),
    }
}

/// Load an `id,fold` table (header required).
pub fn load_folds(path: &Path) -> TrainingResult<FoldAssignment> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_path(path)?;
    let mut pairs = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let (Some(id), Some(fold)) = (record.get(0), record.get(1)) else {
            return Err(TrainingError::input(format!(
                "{} row {}: expected 'id,fold'",
                path.display(),
                idx + 2
            )));
        };
        let fold = fold.parse::<usize>().map_err(|e| {
            TrainingError::input(format!("{} row {}: invalid fold '{fold}': {e}", path.display(), idx + 2))
        })?;
        pairs.push((id.to_string(), fold));
    }
    let folds = FoldAssignment::from_pairs(pairs)?;
    tracing::debug!(path = %path.display(), ids = folds.len(), folds = folds.num_folds(), "loaded fold table");
    Ok(folds)
}
