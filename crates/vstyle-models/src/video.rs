//! Video submissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, ModelResult};
use crate::layout::{key_basename, StorageLayout};

/// Identifier of a video, derived from its filename without extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Derive the ID from a video filename or key (`"in/clip.final.mp4"` -> `"clip.final"`).
    pub fn from_filename(name: &str) -> ModelResult<Self> {
        let base = key_basename(name);
        let stem = match base.rfind('.') {
            Some(0) | None => base,
            Some(pos) => &base[..pos],
        };
        if stem.is_empty() || stem.starts_with('.') {
            return Err(ModelError::invalid_video_name(name));
        }
        Ok(Self(stem.to_string()))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One video submission.
///
/// Namespaces are resolved from the [`StorageLayout`] once, at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoJob {
    pub id: VideoId,
    /// Key of the source video in the object store
    pub source_video: String,
    pub input_prefix: String,
    pub output_prefix: String,
    pub logs_prefix: String,
    pub audio_key: String,
    pub output_video_key: String,
    /// Transform parameter applied to every frame
    pub style: Option<String>,
    /// Number of frames produced by the split (0 until known)
    pub frame_count: u32,
    /// Optional cap on submitted frame jobs
    pub submission_cap: Option<u32>,
    pub layout: StorageLayout,
    pub created_at: DateTime<Utc>,
}

impl VideoJob {
    pub fn new(source_video: impl Into<String>, layout: StorageLayout) -> ModelResult<Self> {
        let source_video = source_video.into();
        let id = VideoId::from_filename(&source_video)?;

        Ok(Self {
            input_prefix: layout.input_prefix(&id),
            output_prefix: layout.output_prefix(&id),
            logs_prefix: layout.logs_prefix(&id),
            audio_key: layout.audio_key(&id),
            output_video_key: layout.output_video_key(&id),
            id,
            source_video,
            style: None,
            frame_count: 0,
            submission_cap: None,
            layout,
            created_at: Utc::now(),
        })
    }

    /// Set the style.
    pub fn with_style(mut self, style: Option<String>) -> Self {
        self.style = style;
        self
    }

    /// Set the frame count.
    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count;
        self
    }

    /// Set the submission cap.
    pub fn with_submission_cap(mut self, cap: Option<u32>) -> Self {
        self.submission_cap = cap;
        self
    }

    /// Number of frames the completion barrier waits for, before enqueueing.
    pub fn expected_frames(&self) -> u32 {
        match self.submission_cap {
            Some(cap) => cap.min(self.frame_count),
            None => self.frame_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_from_filename() {
        assert_eq!(VideoId::from_filename("dance.mp4").unwrap().as_str(), "dance");
        assert_eq!(VideoId::from_filename("videos/clip.final.mov").unwrap().as_str(), "clip.final");
        assert_eq!(VideoId::from_filename("noext").unwrap().as_str(), "noext");
        assert!(VideoId::from_filename(".mp4").is_err());
        assert!(VideoId::from_filename("").is_err());
    }

    #[test]
    fn test_video_job_namespaces() {
        let job = VideoJob::new("dance.mp4", StorageLayout::default()).unwrap();
        assert_eq!(job.id.as_str(), "dance");
        assert_eq!(job.input_prefix, "dance/input_frames");
        assert_eq!(job.output_prefix, "dance/output_frames");
        assert_eq!(job.audio_key, "dance/audio.aac");
        assert_eq!(job.output_video_key, "dance/dance_processed.mp4");
    }

    #[test]
    fn test_expected_frames_honors_cap() {
        let job = VideoJob::new("dance.mp4", StorageLayout::default())
            .unwrap()
            .with_frame_count(120);
        assert_eq!(job.expected_frames(), 120);
        assert_eq!(job.clone().with_submission_cap(Some(50)).expected_frames(), 50);
        assert_eq!(job.with_submission_cap(Some(500)).expected_frames(), 120);
    }
}
