//! Frame jobs: the body of a queue message.

use serde::{Deserialize, Serialize};

use crate::error::ModelResult;
use crate::video::{VideoId, VideoJob};

/// One frame to transform.
///
/// Carries every key a worker needs, so it never has to look up the
/// owning [`VideoJob`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameJob {
    /// Frame filename, e.g. `000001_frame.jpg`
    pub input_frame: String,
    /// Owning video
    #[serde(alias = "video_or_input_dir")]
    pub video_name: VideoId,
    /// Prefix of the source frame
    pub input_dir: String,
    /// Prefix the transformed frame is written under
    pub output_dir: String,
    /// Transform parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Prefix for the per-frame log artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

impl FrameJob {
    /// Build the job for one frame of a video.
    pub fn for_frame(video: &VideoJob, input_frame: impl Into<String>) -> Self {
        Self {
            input_frame: input_frame.into(),
            video_name: video.id.clone(),
            input_dir: video.input_prefix.clone(),
            output_dir: video.output_prefix.clone(),
            style: video.style.clone(),
            log_dir: Some(video.logs_prefix.clone()),
        }
    }

    /// Key of the source frame.
    pub fn input_key(&self) -> String {
        format!("{}/{}", self.input_dir, self.input_frame)
    }

    /// Key of the transformed frame. Same filename as the input, so a
    /// redelivered job overwrites the same object.
    pub fn output_key(&self) -> String {
        format!("{}/{}", self.output_dir, self.input_frame)
    }

    /// Filename without extension.
    pub fn frame_stem(&self) -> &str {
        match self.input_frame.rfind('.') {
            Some(pos) if pos > 0 => &self.input_frame[..pos],
            _ => &self.input_frame,
        }
    }

    /// Key of the per-frame log, if logs are enabled for this job.
    pub fn log_key(&self) -> Option<String> {
        self.log_dir
            .as_ref()
            .map(|dir| format!("{}/{}.log", dir, self.frame_stem()))
    }

    /// Key used to recognize duplicates of the same frame.
    pub fn idempotency_key(&self) -> String {
        format!("frame:{}:{}", self.video_name, self.input_frame)
    }

    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
