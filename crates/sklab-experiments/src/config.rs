//! Experiment configuration.
//!
//! A TOML file with `[General]`, `[Input]`, `[Tuning]` and `[Output]` sections
//! is parsed once into an immutable, validated [`ExperimentConfig`]. Unknown
//! keys are rejected; relative paths are resolved against the config file's
//! directory.

use crate::error::{ExperimentError, ExperimentResult};
use serde::{Deserialize, Serialize};
use sklab_training::{FeatureScaling, LearnerConfig, ModelKind, Objective, DEFAULT_SEED};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Task {
    Train,
    CrossValidate,
    Evaluate,
    Predict,
}

impl Task {
    pub fn name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::CrossValidate => "cross_validate",
            Self::Evaluate => "evaluate",
            Self::Predict => "predict",
        }
    }

    /// Whether the task needs a test set.
    pub fn needs_test_set(self) -> bool {
        matches!(self, Self::Evaluate | Self::Predict)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "cross_validate" | "cross-validate" => Ok(Self::CrossValidate),
            "evaluate" => Ok(Self::Evaluate),
            "predict" => Ok(Self::Predict),
            other => Err(ExperimentError::config(format!(
                "unknown task '{other}' (expected train, cross_validate, evaluate or predict)"
            ))),
        }
    }
}

impl TryFrom<String> for Task {
    type Error = ExperimentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Task> for String {
    fn from(task: Task) -> Self {
        task.name().to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(rename = "General")]
    general: GeneralFile,
    #[serde(rename = "Input")]
    input: InputFile,
    #[serde(rename = "Tuning", default)]
    tuning: TuningFile,
    #[serde(rename = "Output", default)]
    output: OutputFile,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneralFile {
    experiment_name: String,
    task: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputFile {
    train_location: Option<PathBuf>,
    test_location: Option<PathBuf>,
    featuresets: Vec<Vec<String>>,
    featureset_names: Option<Vec<String>>,
    #[serde(default = "default_suffix")]
    suffix: String,
    learners: Vec<String>,
    cv_folds_location: Option<PathBuf>,
    #[serde(default = "default_num_cv_folds")]
    num_cv_folds: usize,
    #[serde(default = "default_seed")]
    random_seed: u64,
    #[serde(default = "default_true")]
    sparse: bool,
    #[serde(default)]
    feature_scaling: FeatureScaling,
    #[serde(default = "default_min_feature_count")]
    min_feature_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TuningFile {
    #[serde(default)]
    grid_search: bool,
    #[serde(default = "default_objective")]
    objective: String,
    #[serde(default = "default_grid_search_jobs")]
    grid_search_jobs: usize,
    #[serde(default = "default_grid_search_folds")]
    grid_search_folds: usize,
    #[serde(default = "default_true")]
    use_folds_file_for_grid_search: bool,
}

impl Default for TuningFile {
    fn default() -> Self {
        Self {
            grid_search: false,
            objective: default_objective(),
            grid_search_jobs: default_grid_search_jobs(),
            grid_search_folds: default_grid_search_folds(),
            use_folds_file_for_grid_search: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputFile {
    log: Option<PathBuf>,
    models: Option<PathBuf>,
    vocabs: Option<PathBuf>,
    predictions: Option<PathBuf>,
    results: Option<PathBuf>,
    #[serde(default)]
    probability: bool,
    #[serde(default)]
    metrics: Vec<String>,
}

fn default_suffix() -> String {
    ".jsonlines".to_string()
}

fn default_num_cv_folds() -> usize {
    10
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_true() -> bool {
    true
}

fn default_min_feature_count() -> usize {
    1
}

fn default_objective() -> String {
    Objective::F1Micro.name().to_string()
}

fn default_grid_search_jobs() -> usize {
    1
}

fn default_grid_search_folds() -> usize {
    3
}

/// One featureset to load: files merged under a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturesetSpec {
    pub name: String,
    pub files: Vec<String>,
}

/// Output directories; a missing entry disables that output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDirs {
    pub log: Option<PathBuf>,
    pub models: Option<PathBuf>,
    pub vocabs: Option<PathBuf>,
    pub predictions: Option<PathBuf>,
    pub results: Option<PathBuf>,
}

/// Validated experiment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub experiment_name: String,
    pub task: Task,

    pub train_location: PathBuf,
    pub test_location: Option<PathBuf>,
    pub featuresets: Vec<FeaturesetSpec>,
    pub suffix: String,
    pub learners: Vec<ModelKind>,
    pub cv_folds_location: Option<PathBuf>,
    pub num_cv_folds: usize,
    pub random_seed: u64,
    pub sparse: bool,
    pub feature_scaling: FeatureScaling,
    pub min_feature_count: usize,

    pub grid_search: bool,
    pub objective: Objective,
    pub grid_search_jobs: usize,
    pub grid_search_folds: usize,
    pub use_folds_file_for_grid_search: bool,

    pub output: OutputDirs,
    pub probability: bool,
    /// Extra objectives scored by the evaluate task.
    pub metrics: Vec<Objective>,
}

impl ExperimentConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> ExperimentResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExperimentError::config(format!("failed to read {}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml_str(&content, base)
    }

    /// Parse and validate TOML; relative paths are resolved against `base`.
    pub fn from_toml_str(content: &str, base: &Path) -> ExperimentResult<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        let ConfigFile { general, input, tuning, output } = file;

        let task: Task = general.task.parse()?;
        let learners = input
            .learners
            .iter()
            .map(|name| {
                name.parse::<ModelKind>()
                    .map_err(|_| ExperimentError::config(format!("[Input] learners: unknown learner '{name}'")))
            })
            .collect::<ExperimentResult<Vec<_>>>()?;
        let parse_objective = |name: &str| {
            name.parse::<Objective>()
                .map_err(|_| ExperimentError::config(format!("unknown objective function '{name}'")))
        };
        let objective = parse_objective(tuning.objective.as_str())?;
        let metrics = output
            .metrics
            .iter()
            .map(|m| parse_objective(m.as_str()))
            .collect::<ExperimentResult<Vec<_>>>()?;

        let names = match input.featureset_names {
            Some(names) if names.len() != input.featuresets.len() => {
                return Err(ExperimentError::config(format!(
                    "featureset_names has {} entries but featuresets has {}",
                    names.len(),
                    input.featuresets.len()
                )));
            }
            Some(names) => names,
            None => input.featuresets.iter().map(|files| files.join("+")).collect(),
        };
        let featuresets = names
            .into_iter()
            .zip(input.featuresets)
            .map(|(name, files)| FeaturesetSpec { name, files })
            .collect();

        let train_location = input
            .train_location
            .ok_or_else(|| ExperimentError::config("[Input] train_location is required"))?;

        let config = Self {
            experiment_name: general.experiment_name,
            task,
            train_location: resolve(train_location),
            test_location: input.test_location.map(resolve),
            featuresets,
            suffix: input.suffix,
            learners,
            cv_folds_location: input.cv_folds_location.map(resolve),
            num_cv_folds: input.num_cv_folds,
            random_seed: input.random_seed,
            sparse: input.sparse,
            feature_scaling: input.feature_scaling,
            min_feature_count: input.min_feature_count,
            grid_search: tuning.grid_search,
            objective,
            grid_search_jobs: tuning.grid_search_jobs,
            grid_search_folds: tuning.grid_search_folds,
            use_folds_file_for_grid_search: tuning.use_folds_file_for_grid_search,
            output: OutputDirs {
                log: output.log.map(resolve),
                models: output.models.map(resolve),
                vocabs: output.vocabs.map(resolve),
                predictions: output.predictions.map(resolve),
                results: output.results.map(resolve),
            },
            probability: output.probability,
            metrics,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ExperimentResult<()> {
        if self.experiment_name.trim().is_empty() {
            return Err(ExperimentError::config("[General] experiment_name must not be empty"));
        }
        if self.featuresets.is_empty() {
            return Err(ExperimentError::config("[Input] featuresets must list at least one featureset"));
        }
        if let Some(spec) = self.featuresets.iter().find(|f| f.files.is_empty()) {
            return Err(ExperimentError::config(format!("featureset '{}' names no feature files", spec.name)));
        }
        if self.learners.is_empty() {
            return Err(ExperimentError::config("[Input] learners must list at least one learner"));
        }
        if self.task.needs_test_set() && self.test_location.is_none() {
            return Err(ExperimentError::config(format!("task '{}' requires [Input] test_location", self.task)));
        }
        if matches!(self.task, Task::Evaluate | Task::CrossValidate) && self.output.results.is_none() {
            return Err(ExperimentError::config(format!("task '{}' requires [Output] results", self.task)));
        }
        if self.cv_folds_location.is_some() && self.task != Task::CrossValidate {
            return Err(ExperimentError::config(format!(
                "cv_folds_location is only used by cross_validate, not '{}'",
                self.task
            )));
        }
        if self.num_cv_folds < 2 {
            return Err(ExperimentError::config(format!("num_cv_folds must be >= 2, got {}", self.num_cv_folds)));
        }
        if self.grid_search_folds < 2 {
            return Err(ExperimentError::config(format!(
                "grid_search_folds must be >= 2, got {}",
                self.grid_search_folds
            )));
        }
        if self.grid_search_jobs == 0 {
            return Err(ExperimentError::config("grid_search_jobs must be >= 1"));
        }
        for learner in &self.learners {
            if self.probability && !learner.estimator().supports_probabilities() {
                return Err(ExperimentError::config(format!(
                    "{learner} cannot produce probabilities; remove it or set probability = false"
                )));
            }
        }
        for objective in std::iter::once(&self.objective).chain(&self.metrics) {
            if objective.needs_probabilities() && !self.probability {
                return Err(ExperimentError::config(format!(
                    "objective '{objective}' requires [Output] probability = true"
                )));
            }
        }
        Ok(())
    }

    pub fn learner_config(&self, model: ModelKind) -> LearnerConfig {
        LearnerConfig {
            model,
            probability: self.probability,
            min_feature_count: self.min_feature_count,
            feature_scaling: self.feature_scaling,
            seed: self.random_seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[General]
experiment_name = "exp"
task = "cross-validate"

[Input]
train_location = "train"
featuresets = [["a", "b"], ["c"]]
learners = ["LogisticRegression", "MultinomialNB"]

[Output]
results = "/tmp/results"
"#;

    #[test]
    fn test_defaults_and_path_resolution() {
        let config = ExperimentConfig::from_toml_str(MINIMAL, Path::new("/configs")).unwrap();
        assert_eq!(config.task, Task::CrossValidate);
        assert_eq!(config.train_location, PathBuf::from("/configs/train"));
        assert_eq!(config.output.results, Some(PathBuf::from("/tmp/results")));
        assert_eq!(config.featuresets[0].name, "a+b");
        assert_eq!(config.featuresets[1].files, vec!["c".to_string()]);
        assert_eq!(config.suffix, ".jsonlines");
        assert_eq!(config.num_cv_folds, 10);
        assert_eq!(config.random_seed, DEFAULT_SEED);
        assert_eq!(config.objective, Objective::F1Micro);
        assert_eq!(config.grid_search_folds, 3);
        assert!(config.sparse);
        assert!(config.use_folds_file_for_grid_search);
        assert!(!config.grid_search);
    }

    fn expect_config_error(toml: &str) -> String {
        match ExperimentConfig::from_toml_str(toml, Path::new("/")) {
            Err(ExperimentError::Config(msg)) => msg,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_learner_and_objective_rejected() {
        let msg = expect_config_error(&MINIMAL.replace("MultinomialNB", "Perceptron"));
        assert!(msg.contains("Perceptron"));
        let msg = expect_config_error(&format!("{MINIMAL}\n[Tuning]\nobjective = \"bleu\"\n"));
        assert!(msg.contains("bleu"));
    }

    #[test]
    fn test_svc_learner_name_accepted() {
        let config =
            ExperimentConfig::from_toml_str(&MINIMAL.replace("MultinomialNB", "SVC"), Path::new("/")).unwrap();
        assert_eq!(config.learners, vec![ModelKind::LogisticRegression, ModelKind::LinearSvc]);
    }

    #[test]
    fn test_task_requirements() {
        let msg = expect_config_error(&MINIMAL.replace("cross-validate", "evaluate"));
        assert!(msg.contains("test_location"));
        let msg = expect_config_error(&MINIMAL.replace("results = \"/tmp/results\"", ""));
        assert!(msg.contains("results"));
        let msg = expect_config_error(&MINIMAL.replace("task = \"cross-validate\"", "task = \"tune\""));
        assert!(msg.contains("tune"));
    }

    #[test]
    fn test_featureset_names_must_match() {
        let toml = MINIMAL.replace("learners =", "featureset_names = [\"only\"]\nlearners =");
        let msg = expect_config_error(&toml);
        assert!(msg.contains("featureset_names"));
    }

    #[test]
    fn test_probability_constraints() {
        let toml = format!("{MINIMAL}probability = true\n").replace("MultinomialNB", "LinearSVC");
        assert!(expect_config_error(&toml).contains("LinearSVC"));
        let toml = format!("{MINIMAL}\n[Tuning]\nobjective = \"roc_auc\"\n");
        assert!(expect_config_error(&toml).contains("probability"));
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let toml = MINIMAL.replace("[Output]", "[Output]\nresult = \"typo\"");
        assert!(matches!(ExperimentConfig::from_toml_str(&toml, Path::new("/")), Err(ExperimentError::Toml(_))));
    }

    #[test]
    fn test_fold_counts_validated() {
        let toml = MINIMAL.replace("learners =", "num_cv_folds = 1\nlearners =");
        assert!(expect_config_error(&toml).contains("num_cv_folds"));
        let toml = format!("{MINIMAL}\n[Tuning]\ngrid_search_jobs = 0\n");
        assert!(expect_config_error(&toml).contains("grid_search_jobs"));
    }
}
