//! `sklab check` command.

use colored::Colorize;
use sklab_experiments::{ExperimentConfig, OutputLayout};

pub fn execute(config: &ExperimentConfig, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    let layout = OutputLayout::for_config(config);
    println!("{} {} is valid", "Configuration".bold(), config.experiment_name.cyan());
    println!("  task: {}", config.task);
    println!("  objective: {}{}", config.objective, if config.grid_search { " (grid search)" } else { "" });
    println!("  train: {}", config.train_location.display());
    if let Some(test) = &config.test_location {
        println!("  test: {}", test.display());
    }
    if let Some(folds) = &config.cv_folds_location {
        println!("  folds: {}", folds.display());
    }

    let jobs = config.featuresets.len() * config.learners.len();
    println!("{} {jobs} jobs", "Jobs:".bold());
    for spec in &config.featuresets {
        for &learner in &config.learners {
            println!("  {}", layout.prefix(&spec.name, learner));
        }
    }
    Ok(())
}
