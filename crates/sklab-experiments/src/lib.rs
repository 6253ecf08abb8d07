//! sklab Experiments
//!
//! Declarative experiment runs on top of `sklab-training`:
//! - Validated TOML configuration (`ExperimentConfig`)
//! - Output file layout (`OutputLayout`)
//! - Result records and writers (results text/JSON, predictions, summary)
//! - The experiment runner (`run_experiment`)

pub mod config;
pub mod error;
pub mod layout;
pub mod results;
pub mod runner;

pub use config::{ExperimentConfig, FeaturesetSpec, OutputDirs, Task};
pub use error::{ExperimentError, ExperimentResult};
pub use layout::{prepare_log_file, OutputLayout};
pub use results::{format_score, write_predictions, write_summary, ConfusionMatrix, PredictionTable, ResultRecord};
pub use runner::{run_experiment, JobFailure, RunSummary};
