//! sklab Training
//!
//! Supervised-learning primitives for running experiments:
//! - Loading and merging featuresets (`load_featureset`)
//! - Fold assignments for cross-validation (`FoldAssignment`, `make_folds`)
//! - Named objective functions, including weighted kappa (`Objective`, `kappa`)
//! - Feature selection and scaling (`SelectByMinCount`, `FeatureScaling`)
//! - Estimator families and the `Learner` with nested grid search
//! - Model artifacts and progress reporting

pub mod artifacts;
pub mod dataset;
pub mod error;
pub mod estimators;
pub mod folds;
pub mod grid;
pub mod learner;
pub mod loader;
pub mod matrix;
pub mod metrics;
pub mod progress;
pub mod selection;

pub use artifacts::{load_vocabulary, save_vocabulary, sha256_file, write_atomic, Artifact, ArtifactKind};
pub use dataset::{Example, FeatureSet, FeaturesetId, Label, Vocabulary};
pub use error::{TrainingError, TrainingResult};
pub use estimators::{Estimator, FittedModel, HyperParams, ModelKind, TaskKind};
pub use folds::{folds_for, load_folds, make_folds, make_stratified_folds, FoldAssignment, FoldSpec, Split, DEFAULT_SEED};
pub use grid::{grid_search, GridPointScore, GridSearchOutcome};
pub use learner::{score_predictions, CrossValidation, FoldOutcome, Learner, LearnerConfig, TrainedModel};
pub use loader::{load_featureset, read_examples, write_jsonl_examples, LoadOptions};
pub use matrix::{CsrMatrix, FeatureMatrix};
pub use metrics::{confusion_matrix, kappa, kappa_with, KappaWeights, Objective, Predictions};
pub use progress::{JobId, ProgressEvent, ProgressSink, RecordingProgressSink, TracingProgressSink};
pub use selection::{FeatureScaling, Scaler, SelectByMinCount};
