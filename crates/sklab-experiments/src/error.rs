use sklab_training::TrainingError;
use thiserror::Error;

pub type ExperimentResult<T> = std::result::Result<T, ExperimentError>;

#[derive(Debug, Error)]
pub enum ExperimentError {
    /// Invalid or inconsistent experiment configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl ExperimentError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
