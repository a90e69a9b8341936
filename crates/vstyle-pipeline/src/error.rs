//! Pipeline error types.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source video not found: {0}")]
    SourceNotFound(String),

    #[error("No frames: {0}")]
    NoFrames(String),

    #[error("Expected {expected} output frames, found {found}")]
    FrameCountMismatch { expected: u32, found: u32 },

    #[error("Output frame sequence has a gap at index {index}")]
    FrameSequenceGap { index: u32 },

    #[error("{missing} frames still missing after reconciliation")]
    Incomplete { missing: usize },

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vstyle_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] vstyle_queue::QueueError),

    #[error("Media error: {0}")]
    Media(#[from] vstyle_media::MediaError),

    #[error("Model error: {0}")]
    Model(#[from] vstyle_models::ModelError),

    #[error("Worker error: {0}")]
    Worker(#[from] vstyle_worker::WorkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn source_not_found(key: impl Into<String>) -> Self {
        Self::SourceNotFound(key.into())
    }

    pub fn no_frames(msg: impl Into<String>) -> Self {
        Self::NoFrames(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
