pub mod check;
pub mod run;

use anyhow::Context;
use sklab_experiments::ExperimentConfig;
use std::path::Path;

pub fn load_config(path: &Path) -> anyhow::Result<ExperimentConfig> {
    ExperimentConfig::load(path).with_context(|| format!("invalid experiment configuration {}", path.display()))
}
