use anyhow::Context;
use clap::ValueEnum;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber: stderr in `format`, plus a plain-text
/// copy appended to `log_file` when one is configured.
pub fn init(level: &str, format: LogFormat, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{level}'"))?;

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    layers.push(match format {
        LogFormat::Text => fmt::layer().with_writer(io::stderr).with_target(false).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(io::stderr).boxed(),
    });
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        layers.push(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)).boxed());
    }

    tracing_subscriber::registry().with(layers).with(filter).try_init().context("failed to install logger")?;
    Ok(())
}
