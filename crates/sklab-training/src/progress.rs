use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Identifier for one `(featureset, learner, task)` job within an experiment run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    JobStarted { job_id: JobId, featureset: String, learner: String, task: String },
    GridPointScored { job_id: JobId, params: String, mean_score: f64 },
    FoldFinished { job_id: JobId, fold: usize, score: f64 },
    JobFinished { job_id: JobId, score: f64 },
    JobFailed { job_id: JobId, error: String },
}

impl ProgressEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::JobStarted { job_id, .. }
            | Self::GridPointScored { job_id, .. }
            | Self::FoldFinished { job_id, .. }
            | Self::JobFinished { job_id, .. }
            | Self::JobFailed { job_id, .. } => job_id,
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::JobStarted { job_id, featureset, learner, task } => {
                tracing::info!(%job_id, %featureset, %learner, %task, "job started");
            }
            ProgressEvent::GridPointScored { job_id, params, mean_score } => {
                tracing::debug!(%job_id, %params, mean_score, "grid point scored");
            }
            ProgressEvent::FoldFinished { job_id, fold, score } => {
                tracing::info!(%job_id, fold, score, "fold finished");
            }
            ProgressEvent::JobFinished { job_id, score } => tracing::info!(%job_id, score, "job finished"),
            ProgressEvent::JobFailed { job_id, error } => tracing::error!(%job_id, %error, "job failed"),
        }
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
