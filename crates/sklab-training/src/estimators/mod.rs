//! Estimator families behind a common fit/predict interface.
//!
//! The learner is written against [`Estimator`] only. Each family declares its
//! default hyperparameters and the fixed grid searched during tuning, and
//! fitting yields a serializable [`FittedModel`].

mod linalg;
mod linear;
mod naive_bayes;
mod ridge;

pub use linear::{LinearClassifier, LinearSvc, LogisticRegression};
pub use naive_bayes::{MultinomialNb, NaiveBayesModel};
pub use ridge::{Ridge, RidgeModel};

use crate::error::{TrainingError, TrainingResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Classification,
    Regression,
}

/// Estimator families selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelKind {
    LogisticRegression,
    LinearSvc,
    MultinomialNb,
    Ridge,
    RescaledRidge,
}

impl ModelKind {
    pub const ALL: [Self; 5] =
        [Self::LogisticRegression, Self::LinearSvc, Self::MultinomialNb, Self::Ridge, Self::RescaledRidge];

    pub fn name(self) -> &'static str {
        match self {
            Self::LogisticRegression => "LogisticRegression",
            Self::LinearSvc => "LinearSVC",
            Self::MultinomialNb => "MultinomialNB",
            Self::Ridge => "Ridge",
            Self::RescaledRidge => "RescaledRidge",
        }
    }

    pub fn task(self) -> TaskKind {
        match self {
            Self::LogisticRegression | Self::LinearSvc | Self::MultinomialNb => TaskKind::Classification,
            Self::Ridge | Self::RescaledRidge => TaskKind::Regression,
        }
    }

    pub fn estimator(self) -> Box<dyn Estimator> {
        match self {
            Self::LogisticRegression => Box::new(LogisticRegression),
            Self::LinearSvc => Box::new(LinearSvc),
            Self::MultinomialNb => Box::new(MultinomialNb),
            Self::Ridge => Box::new(Ridge { rescale: false }),
            Self::RescaledRidge => Box::new(Ridge { rescale: true }),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = TrainingError;

    /// Accepts the canonical names plus `SVC`, which maps to the linear SVM.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "SVC" {
            return Ok(Self::LinearSvc);
        }
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| TrainingError::Config(format!("unknown learner '{s}'")))
    }
}

impl TryFrom<String> for ModelKind {
    type Error = TrainingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        kind.name().to_string()
    }
}

/// Named numeric hyperparameters, e.g. `C=0.1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperParams(BTreeMap<String, f64>);

impl HyperParams {
    #[must_use]
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    fn require(&self, name: &str) -> TrainingResult<f64> {
        self.get(name)
            .ok_or_else(|| TrainingError::Config(format!("missing hyperparameter '{name}'")))
    }

    /// One point per value of a single named parameter.
    pub fn grid(name: &str, values: &[f64]) -> Vec<Self> {
        values.iter().map(|v| Self::default().with(name, *v)).collect()
    }
}

impl fmt::Display for HyperParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("defaults");
        }
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(", "))
    }
}

/// Encoded training targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// Class indices into a sorted class list.
    Classes { y: Vec<usize>, n_classes: usize },
    Values(Vec<f64>),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Self::Classes { y, .. } => y.len(),
            Self::Values(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn classes(&self) -> TrainingResult<(&[usize], usize)> {
        match self {
            Self::Classes { y, n_classes } if *n_classes >= 2 => Ok((y, *n_classes)),
            Self::Classes { n_classes, .. } => Err(TrainingError::Estimator(format!(
                "classification needs at least 2 classes in the training data, found {n_classes}"
            ))),
            Self::Values(_) => Err(TrainingError::Config("classifier given regression targets".to_string())),
        }
    }

    fn values(&self) -> TrainingResult<&[f64]> {
        match self {
            Self::Values(v) => Ok(v),
            Self::Classes { .. } => Err(TrainingError::Config("regressor given class targets".to_string())),
        }
    }
}

/// Raw model output before class indices are mapped back to labels.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Classes { indices: Vec<usize>, probabilities: Option<Array2<f64>> },
    Values(Vec<f64>),
}

/// A fit/predict-capable estimator family.
pub trait Estimator: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn default_params(&self) -> HyperParams;

    /// Fixed grid, in the enumeration order used for tie-breaking.
    fn param_grid(&self) -> Vec<HyperParams>;

    fn supports_probabilities(&self) -> bool;

    fn fit(&self, x: &Array2<f64>, targets: &Targets, params: &HyperParams) -> TrainingResult<FittedModel>;
}

/// Fitted estimator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum FittedModel {
    Linear(LinearClassifier),
    NaiveBayes(NaiveBayesModel),
    Ridge(RidgeModel),
}

impl FittedModel {
    pub fn predict(&self, x: &Array2<f64>) -> RawOutput {
        match self {
            Self::Linear(m) => m.predict(x),
            Self::NaiveBayes(m) => m.predict(x),
            Self::Ridge(m) => RawOutput::Values(m.predict(x)),
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Self::Linear(m) => m.n_features(),
            Self::NaiveBayes(m) => m.n_features(),
            Self::Ridge(m) => m.n_features(),
        }
    }
}
