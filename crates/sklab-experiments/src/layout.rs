use crate::config::{ExperimentConfig, OutputDirs};
use crate::error::ExperimentResult;
use sklab_training::ModelKind;
use std::path::PathBuf;

/// Output file naming for one experiment.
///
/// Per-job files share the prefix `<experiment>_<featureset>_<learner>`;
/// the summary is `<results>/<experiment>_summary.tsv`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    experiment: String,
    dirs: OutputDirs,
}

impl OutputLayout {
    #[must_use]
    pub fn new(experiment: impl Into<String>, dirs: OutputDirs) -> Self {
        Self { experiment: experiment.into(), dirs }
    }

    #[must_use]
    pub fn for_config(config: &ExperimentConfig) -> Self {
        Self::new(config.experiment_name.clone(), config.output.clone())
    }

    #[must_use]
    pub fn prefix(&self, featureset: &str, learner: ModelKind) -> String {
        format!("{}_{featureset}_{learner}", self.experiment)
    }

    fn file(dir: Option<&PathBuf>, name: String) -> Option<PathBuf> {
        dir.map(|d| d.join(name))
    }

    #[must_use]
    pub fn results_path(&self, featureset: &str, learner: ModelKind) -> Option<PathBuf> {
        Self::file(self.dirs.results.as_ref(), format!("{}.results", self.prefix(featureset, learner)))
    }

    #[must_use]
    pub fn results_json_path(&self, featureset: &str, learner: ModelKind) -> Option<PathBuf> {
        Self::file(self.dirs.results.as_ref(), format!("{}.results.json", self.prefix(featureset, learner)))
    }

    #[must_use]
    pub fn predictions_path(&self, featureset: &str, learner: ModelKind) -> Option<PathBuf> {
        Self::file(self.dirs.predictions.as_ref(), format!("{}.predictions", self.prefix(featureset, learner)))
    }

    #[must_use]
    pub fn model_path(&self, featureset: &str, learner: ModelKind) -> Option<PathBuf> {
        Self::file(self.dirs.models.as_ref(), format!("{}.model", self.prefix(featureset, learner)))
    }

    #[must_use]
    pub fn vocab_path(&self, featureset: &str, learner: ModelKind) -> Option<PathBuf> {
        Self::file(self.dirs.vocabs.as_ref(), format!("{}.vocab", self.prefix(featureset, learner)))
    }

    #[must_use]
    pub fn summary_path(&self) -> Option<PathBuf> {
        Self::file(self.dirs.results.as_ref(), format!("{}_summary.tsv", self.experiment))
    }

    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        Self::file(self.dirs.log.as_ref(), format!("{}.log", self.experiment))
    }

    pub fn ensure_dirs(&self) -> ExperimentResult<()> {
        let dirs = [&self.dirs.log, &self.dirs.models, &self.dirs.vocabs, &self.dirs.predictions, &self.dirs.results];
        for dir in dirs.into_iter().flatten() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn dirs(&self) -> &OutputDirs {
        &self.dirs
    }
}

/// Create the log directory for `config`, returning the log file path if one is configured.
pub fn prepare_log_file(config: &ExperimentConfig) -> ExperimentResult<Option<PathBuf>> {
    let layout = OutputLayout::for_config(config);
    if let Some(dir) = layout.dirs().log.as_deref() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(layout.log_path())
}
