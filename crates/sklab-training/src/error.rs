use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    /// Malformed or inconsistent input data.
    #[error("input error: {0}")]
    Input(String),

    /// Operation invoked on a learner in the wrong lifecycle state.
    #[error("state error: {0}")]
    State(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("estimator error: {0}")]
    Estimator(String),

    /// A grid search worker failed; names the hyperparameters and inner fold.
    #[error("grid search failed for {params} on fold {fold}: {source}")]
    GridSearch {
        params: String,
        fold: usize,
        #[source]
        source: Box<TrainingError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// `true` for [`TrainingError::Input`], including when wrapped by a grid search failure.
    pub fn is_input(&self) -> bool {
        match self {
            Self::Input(_) => true,
            Self::GridSearch { source, .. } => source.is_input(),
            _ => false,
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_search_error_names_point_and_fold() {
        let err = TrainingError::GridSearch {
            params: "C=0.1".to_string(),
            fold: 2,
            source: Box::new(TrainingError::Estimator("singular matrix".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("C=0.1"));
        assert!(msg.contains("fold 2"));
        assert!(msg.contains("singular matrix"));
    }

    #[test]
    fn test_is_input_sees_through_grid_search() {
        let err = TrainingError::GridSearch {
            params: "alpha=1".to_string(),
            fold: 0,
            source: Box::new(TrainingError::input("negative feature value")),
        };
        assert!(err.is_input());
        assert!(!err.is_state());
    }
}
