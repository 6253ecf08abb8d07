//! Named objective functions over `(y_true, y_pred)`.
//!
//! Every objective is higher-is-better; error-style metrics are negated
//! (`neg_mean_squared_error`, `neg_log_loss`). Grid search and held-out
//! evaluation use the same [`Objective::score`] entry point.
//!
//! # Kappa
//!
//! [`kappa`] builds the observed confusion matrix `O` over the `N` distinct
//! label values (sorted; numeric when every label parses as a number) and the
//! expected matrix `E` from the outer product of the marginals, then returns
//! `1 - Σ w·O / Σ w·E` with indicator, linear `|i-j|/(N-1)` or quadratic
//! `(i-j)²/(N-1)²` weights.

use crate::dataset::Label;
use crate::error::{TrainingError, TrainingResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Predictions produced by a trained model for a batch of examples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    /// Hard predictions: class labels, or numeric targets for regression.
    pub labels: Vec<Label>,
    /// Class probabilities (rows aligned with `labels`, columns with `classes`).
    pub probabilities: Option<Array2<f64>>,
    /// Class labels in column order; empty for regression.
    pub classes: Vec<Label>,
}

impl Predictions {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Kappa weighting scheme; `None` in [`kappa`] means unweighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KappaWeights {
    Linear,
    Quadratic,
}

/// Cohen's kappa, optionally weighted by ordinal distance.
pub fn kappa(y_true: &[Label], y_pred: &[Label], weights: Option<KappaWeights>) -> TrainingResult<f64> {
    kappa_with(y_true, y_pred, weights, false)
}

/// [`kappa`] with optional off-by-one tolerance (adjacent ratings count as agreement).
pub fn kappa_with(
    y_true: &[Label],
    y_pred: &[Label],
    weights: Option<KappaWeights>,
    allow_off_by_one: bool,
) -> TrainingResult<f64> {
    check_lengths(y_true, y_pred)?;

    let numeric = y_true.iter().chain(y_pred).all(|l| l.as_f64().is_some());
    let normalize = |l: &Label| if numeric { Label::Number(l.as_f64().unwrap_or_default()) } else { l.clone() };
    let y_true: Vec<Label> = y_true.iter().map(normalize).collect();
    let y_pred: Vec<Label> = y_pred.iter().map(normalize).collect();

    let mut values: Vec<&Label> = y_true.iter().chain(&y_pred).collect();
    values.sort();
    values.dedup();
    let rank: BTreeMap<&Label, usize> = values.iter().enumerate().map(|(i, l)| (*l, i)).collect();
    let n = values.len();
    let total = y_true.len() as f64;

    let mut observed = Array2::<f64>::zeros((n, n));
    let mut hist_true = vec![0.0; n];
    let mut hist_pred = vec![0.0; n];
    for (t, p) in y_true.iter().zip(&y_pred) {
        let (i, j) = (rank[t], rank[p]);
        observed[[i, j]] += 1.0 / total;
        hist_true[i] += 1.0 / total;
        hist_pred[j] += 1.0 / total;
    }

    let scale = (n.max(2) - 1) as f64;
    let mut weighted_observed = 0.0;
    let mut weighted_expected = 0.0;
    let mut any_weight = false;
    for i in 0..n {
        for j in 0..n {
            let mut diff = i.abs_diff(j);
            if allow_off_by_one && diff > 0 {
                diff -= 1;
            }
            let w = match weights {
                None => f64::from(u8::from(diff > 0)),
                Some(KappaWeights::Linear) => diff as f64 / scale,
                Some(KappaWeights::Quadratic) => (diff * diff) as f64 / (scale * scale),
            };
            any_weight |= w != 0.0;
            weighted_observed += w * observed[[i, j]];
            weighted_expected += w * hist_true[i] * hist_pred[j];
        }
    }

    if !any_weight || weighted_expected == 0.0 {
        return Ok(1.0);
    }
    Ok(1.0 - weighted_observed / weighted_expected)
}

fn check_lengths<T, U>(y_true: &[T], y_pred: &[U]) -> TrainingResult<()> {
    if y_true.len() != y_pred.len() {
        return Err(TrainingError::input(format!(
            "y_true and y_pred differ in length ({} vs {})",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(TrainingError::input("cannot score empty label sequences"));
    }
    Ok(())
}

fn numeric(labels: &[Label], what: &str) -> TrainingResult<Vec<f64>> {
    labels
        .iter()
        .map(|l| {
            l.as_f64()
                .ok_or_else(|| TrainingError::input(format!("{what} requires numeric labels, got '{l}'")))
        })
        .collect()
}

pub fn accuracy(y_true: &[Label], y_pred: &[Label]) -> TrainingResult<f64> {
    check_lengths(y_true, y_pred)?;
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / y_true.len() as f64)
}

/// Square confusion matrix over the sorted union of labels; rows are true labels.
pub fn confusion_matrix(y_true: &[Label], y_pred: &[Label]) -> (Vec<Label>, Vec<Vec<usize>>) {
    let mut labels: Vec<Label> = y_true.iter().chain(y_pred).cloned().collect();
    labels.sort();
    labels.dedup();
    let index: BTreeMap<&Label, usize> = labels.iter().enumerate().map(|(i, l)| (l, i)).collect();
    let mut matrix = vec![vec![0; labels.len()]; labels.len()];
    for (t, p) in y_true.iter().zip(y_pred) {
        matrix[index[t]][index[p]] += 1;
    }
    (labels, matrix)
}

/// Per-class precision, recall and F1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub label: Label,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

pub fn class_stats(y_true: &[Label], y_pred: &[Label]) -> TrainingResult<Vec<ClassStats>> {
    check_lengths(y_true, y_pred)?;
    let (labels, matrix) = confusion_matrix(y_true, y_pred);
    Ok(labels
        .into_iter()
        .enumerate()
        .map(|(k, label)| {
            let tp = matrix[k][k] as f64;
            let predicted: usize = matrix.iter().map(|row| row[k]).sum();
            let actual: usize = matrix[k].iter().sum();
            let precision = ratio(tp, predicted as f64);
            let recall = ratio(tp, actual as f64);
            ClassStats { label, precision, recall, f1: ratio(2.0 * precision * recall, precision + recall) }
        })
        .collect())
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

fn macro_average(y_true: &[Label], y_pred: &[Label], pick: fn(&ClassStats) -> f64) -> TrainingResult<f64> {
    let stats = class_stats(y_true, y_pred)?;
    Ok(stats.iter().map(pick).sum::<f64>() / stats.len() as f64)
}

pub fn pearson(y_true: &[Label], y_pred: &[Label]) -> TrainingResult<f64> {
    check_lengths(y_true, y_pred)?;
    let x = numeric(y_true, "pearson")?;
    let y = numeric(y_pred, "pearson")?;
    Ok(pearson_values(&x, &y))
}

fn pearson_values(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        tracing::warn!("correlation undefined for constant input; scoring as 0");
        return 0.0;
    }
    sxy / (sxx.sqrt() * syy.sqrt())
}

/// Average ranks (ties share the mean rank).
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end - 1) as f64 / 2.0 + 1.0;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }
    ranks
}

pub fn spearman(y_true: &[Label], y_pred: &[Label]) -> TrainingResult<f64> {
    check_lengths(y_true, y_pred)?;
    let x = ranks(&numeric(y_true, "spearman")?);
    let y = ranks(&numeric(y_pred, "spearman")?);
    Ok(pearson_values(&x, &y))
}

pub fn r2(y_true: &[Label], y_pred: &[Label]) -> TrainingResult<f64> {
    check_lengths(y_true, y_pred)?;
    let t = numeric(y_true, "r2")?;
    let p = numeric(y_pred, "r2")?;
    let mean = t.iter().sum::<f64>() / t.len() as f64;
    let ss_res: f64 = t.iter().zip(&p).map(|(a, b)| (a - b).powi(2)).sum();
    let ss_tot: f64 = t.iter().map(|a| (a - mean).powi(2)).sum();
    Ok(if ss_tot == 0.0 { f64::from(u8::from(ss_res == 0.0)) } else { 1.0 - ss_res / ss_tot })
}

pub fn neg_mean_squared_error(y_true: &[Label], y_pred: &[Label]) -> TrainingResult<f64> {
    check_lengths(y_true, y_pred)?;
    let t = numeric(y_true, "neg_mean_squared_error")?;
    let p = numeric(y_pred, "neg_mean_squared_error")?;
    Ok(-t.iter().zip(&p).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / t.len() as f64)
}

fn probability_column(classes: &[Label], label: &Label) -> TrainingResult<usize> {
    classes
        .iter()
        .position(|c| c == label)
        .ok_or_else(|| TrainingError::input(format!("label '{label}' is not one of the model's classes")))
}

/// Area under the ROC curve for a binary task, using the second class as positive.
pub fn roc_auc(y_true: &[Label], classes: &[Label], probabilities: &Array2<f64>) -> TrainingResult<f64> {
    if y_true.len() != probabilities.nrows() || y_true.is_empty() {
        return Err(TrainingError::input(format!(
            "roc_auc needs one probability row per label ({} vs {})",
            y_true.len(),
            probabilities.nrows()
        )));
    }
    if classes.len() != 2 || probabilities.ncols() != 2 {
        return Err(TrainingError::input(format!("roc_auc requires exactly 2 classes, got {}", classes.len())));
    }
    let scores: Vec<f64> = probabilities.column(1).to_vec();
    let positive: Vec<bool> = y_true
        .iter()
        .map(|l| probability_column(classes, l).map(|c| c == 1))
        .collect::<TrainingResult<_>>()?;

    let n_pos = positive.iter().filter(|p| **p).count() as f64;
    let n_neg = positive.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return Err(TrainingError::input("roc_auc is undefined when only one class is present"));
    }
    let rank = ranks(&scores);
    let pos_rank_sum: f64 = rank.iter().zip(&positive).filter(|(_, p)| **p).map(|(r, _)| r).sum();
    Ok((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

pub fn neg_log_loss(y_true: &[Label], classes: &[Label], probabilities: &Array2<f64>) -> TrainingResult<f64> {
    if y_true.len() != probabilities.nrows() || y_true.is_empty() {
        return Err(TrainingError::input(format!(
            "neg_log_loss needs one probability row per label ({} vs {})",
            y_true.len(),
            probabilities.nrows()
        )));
    }
    let mut total = 0.0;
    for (row, label) in y_true.iter().enumerate() {
        let p = probabilities[[row, probability_column(classes, label)?]].clamp(1e-15, 1.0);
        total -= p.ln();
    }
    Ok(-total / y_true.len() as f64)
}

/// Objective functions selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Objective {
    Accuracy,
    Precision,
    Recall,
    F1Macro,
    F1Micro,
    Pearson,
    Spearman,
    R2,
    NegMeanSquaredError,
    UnweightedKappa,
    LinearWeightedKappa,
    QuadraticWeightedKappa,
    UnweightedKappaOffByOne,
    LinearWeightedKappaOffByOne,
    QuadraticWeightedKappaOffByOne,
    RocAuc,
    NegLogLoss,
}

impl Objective {
    pub const ALL: [Self; 17] = [
        Self::Accuracy,
        Self::Precision,
        Self::Recall,
        Self::F1Macro,
        Self::F1Micro,
        Self::Pearson,
        Self::Spearman,
        Self::R2,
        Self::NegMeanSquaredError,
        Self::UnweightedKappa,
        Self::LinearWeightedKappa,
        Self::QuadraticWeightedKappa,
        Self::UnweightedKappaOffByOne,
        Self::LinearWeightedKappaOffByOne,
        Self::QuadraticWeightedKappaOffByOne,
        Self::RocAuc,
        Self::NegLogLoss,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Precision => "precision",
            Self::Recall => "recall",
            Self::F1Macro => "f1_score_macro",
            Self::F1Micro => "f1_score_micro",
            Self::Pearson => "pearson",
            Self::Spearman => "spearman",
            Self::R2 => "r2",
            Self::NegMeanSquaredError => "neg_mean_squared_error",
            Self::UnweightedKappa => "unweighted_kappa",
            Self::LinearWeightedKappa => "linear_weighted_kappa",
            Self::QuadraticWeightedKappa => "quadratic_weighted_kappa",
            Self::UnweightedKappaOffByOne => "uwk_off_by_one",
            Self::LinearWeightedKappaOffByOne => "lwk_off_by_one",
            Self::QuadraticWeightedKappaOffByOne => "qwk_off_by_one",
            Self::RocAuc => "roc_auc",
            Self::NegLogLoss => "neg_log_loss",
        }
    }

    /// Scored from class probabilities rather than hard labels.
    pub fn needs_probabilities(self) -> bool {
        matches!(self, Self::RocAuc | Self::NegLogLoss)
    }

    pub fn score_labels(self, y_true: &[Label], y_pred: &[Label]) -> TrainingResult<f64> {
        match self {
            // Single-label micro-averaged F1 equals accuracy.
            Self::Accuracy | Self::F1Micro => accuracy(y_true, y_pred),
            Self::Precision => macro_average(y_true, y_pred, |s| s.precision),
            Self::Recall => macro_average(y_true, y_pred, |s| s.recall),
            Self::F1Macro => macro_average(y_true, y_pred, |s| s.f1),
            Self::Pearson => pearson(y_true, y_pred),
            Self::Spearman => spearman(y_true, y_pred),
            Self::R2 => r2(y_true, y_pred),
            Self::NegMeanSquaredError => neg_mean_squared_error(y_true, y_pred),
            Self::UnweightedKappa => kappa(y_true, y_pred, None),
            Self::LinearWeightedKappa => kappa(y_true, y_pred, Some(KappaWeights::Linear)),
            Self::QuadraticWeightedKappa => kappa(y_true, y_pred, Some(KappaWeights::Quadratic)),
            Self::UnweightedKappaOffByOne => kappa_with(y_true, y_pred, None, true),
            Self::LinearWeightedKappaOffByOne => kappa_with(y_true, y_pred, Some(KappaWeights::Linear), true),
            Self::QuadraticWeightedKappaOffByOne => {
                kappa_with(y_true, y_pred, Some(KappaWeights::Quadratic), true)
            }
            Self::RocAuc | Self::NegLogLoss => Err(TrainingError::Config(format!(
                "objective '{self}' requires probability predictions"
            ))),
        }
    }

    /// Score predictions against `y_true`, using probabilities where the objective needs them.
    pub fn score(self, y_true: &[Label], predictions: &Predictions) -> TrainingResult<f64> {
        if !self.needs_probabilities() {
            return self.score_labels(y_true, &predictions.labels);
        }
        let probabilities = predictions.probabilities.as_ref().ok_or_else(|| {
            TrainingError::Config(format!("objective '{self}' requires probability mode"))
        })?;
        match self {
            Self::RocAuc => roc_auc(y_true, &predictions.classes, probabilities),
            _ => neg_log_loss(y_true, &predictions.classes, probabilities),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Objective {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|o| o.name() == s)
            .ok_or_else(|| TrainingError::Config(format!("unknown objective function '{s}'")))
    }
}

impl TryFrom<String> for Objective {
    type Error = TrainingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Objective> for String {
    fn from(objective: Objective) -> Self {
        objective.name().to_string()
    }
}
