//! Pipeline error types

use std::time::Duration;

use thiserror::Error;

/// Failures of the video, inference and storage collaborators
///
/// None of these stop a lane's cycle; the owning worker logs them and
/// carries on with stale data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("stream source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    #[error("count sink unavailable: {0}")]
    SinkUnavailable(String),
}
