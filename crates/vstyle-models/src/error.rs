//! Model error types.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid video name: {0}")]
    InvalidVideoName(String),

    #[error("Invalid frame name: {0}")]
    InvalidFrameName(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid_video_name(name: impl Into<String>) -> Self {
        Self::InvalidVideoName(name.into())
    }

    pub fn invalid_frame_name(name: impl Into<String>) -> Self {
        Self::InvalidFrameName(name.into())
    }
}
