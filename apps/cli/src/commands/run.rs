//! `sklab run` command.

use colored::Colorize;
use sklab_experiments::{format_score, run_experiment, ExperimentConfig};
use sklab_training::TracingProgressSink;
use std::sync::Arc;

pub fn execute(config: &ExperimentConfig) -> anyhow::Result<()> {
    let summary = run_experiment(config, Arc::new(TracingProgressSink))?;

    println!("{} {} ({})", "Experiment".bold(), config.experiment_name.cyan(), config.task);
    for record in &summary.records {
        let score = record.score.map_or_else(|| "-".to_string(), format_score);
        println!("  {} {} {} {score}", "ok".green(), record.featureset_name, record.learner);
    }
    for failure in &summary.failures {
        println!("  {} {} {}: {}", "failed".red(), failure.featureset, failure.learner, failure.error);
    }

    let total = summary.records.len() + summary.failures.len();
    if !summary.succeeded() {
        anyhow::bail!("{} of {total} jobs failed", summary.failures.len());
    }
    println!("{} {total} jobs completed", "Done:".green().bold());
    Ok(())
}
