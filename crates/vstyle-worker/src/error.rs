//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vstyle_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vstyle_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vstyle_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Retryable errors come from the store or queue transport; a retry of the
    /// same job may succeed without any change to the job itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::DownloadFailed(_) | WorkerError::UploadFailed(_) | WorkerError::Storage(_) => {
                true
            }
            WorkerError::Queue(e) => e.is_transport(),
            _ => false,
        }
    }
}
