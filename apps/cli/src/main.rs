//! sklab CLI - run machine learning experiments from TOML configuration files
//!
//! The `sklab` binary validates experiment configurations and runs every
//! (featureset, learner) job they describe, writing results, predictions,
//! models and a summary table to the configured output directories.

mod commands;
mod logging;

use clap::{Parser, Subcommand};
use colored::Colorize;
use logging::LogFormat;
use std::path::PathBuf;

/// sklab - declarative machine learning experiments
#[derive(Parser, Debug)]
#[command(
    name = "sklab",
    author,
    version,
    about = "Run machine learning experiments described by TOML configuration files"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an experiment
    ///
    /// Executes every job in the configuration. Failed jobs are reported and
    /// skipped; the exit status is non-zero if any job failed.
    Run {
        /// Path to the experiment configuration file
        config: PathBuf,
    },

    /// Validate a configuration and list the jobs it would run
    Check {
        /// Path to the experiment configuration file
        config: PathBuf,

        /// Print the resolved configuration as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let args = Args::parse();
    if let Err(err) = dispatch(args) {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn dispatch(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Run { config } => {
            let config = commands::load_config(&config)?;
            let log_file = sklab_experiments::prepare_log_file(&config)?;
            logging::init(&args.log_level, args.log_format, log_file.as_deref())?;
            commands::run::execute(&config)
        }
        Command::Check { config, json } => {
            logging::init(&args.log_level, args.log_format, None)?;
            let config = commands::load_config(&config)?;
            commands::check::execute(&config, json)
        }
    }
}
