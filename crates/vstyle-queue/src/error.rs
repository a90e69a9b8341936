//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Lease failed: {0}")]
    LeaseFailed(String),

    #[error("Lease lost for message {0}")]
    LeaseLost(String),

    #[error("Malformed message {message_id}: {reason}")]
    Malformed { message_id: String, reason: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn lease_failed(msg: impl Into<String>) -> Self {
        Self::LeaseFailed(msg.into())
    }

    /// Transport-level failures, as opposed to problems with a message itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QueueError::ConnectionFailed(_) | QueueError::LeaseFailed(_) | QueueError::Redis(_)
        )
    }
}
