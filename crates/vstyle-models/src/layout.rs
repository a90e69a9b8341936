//! Per-video storage namespace layout and frame naming.

use serde::{Deserialize, Serialize};

use crate::video::VideoId;

/// Storage layout for a video's artifacts.
///
/// Every key for a video lives under `{video}/`. Frame filenames are a
/// zero-padded index followed by a constant suffix, so lexicographic order
/// equals temporal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    /// Directory holding the split (untransformed) frames
    pub input_dir: String,
    /// Directory holding the transformed frames
    pub output_dir: String,
    /// Audio track filename
    pub audio_file: String,
    /// Directory holding per-frame worker logs
    pub logs_dir: String,
    /// Suffix appended to the frame index
    pub frame_suffix: String,
    /// Frame image extension (without dot)
    pub frame_extension: String,
    /// Width of the zero-padded frame index
    pub index_width: usize,
    /// Index of the first frame
    pub first_index: u32,
    /// Frame rate used for both split and mux
    pub frame_rate: u32,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            input_dir: "input_frames".to_string(),
            output_dir: "output_frames".to_string(),
            audio_file: "audio.aac".to_string(),
            logs_dir: "logs".to_string(),
            frame_suffix: "_frame".to_string(),
            frame_extension: "jpg".to_string(),
            index_width: 6,
            first_index: 1,
            frame_rate: 30,
        }
    }
}

impl StorageLayout {
    /// Prefix for the input frames of a video (no trailing slash).
    pub fn input_prefix(&self, video: &VideoId) -> String {
        format!("{}/{}", video, self.input_dir)
    }

    /// Prefix for the transformed frames of a video (no trailing slash).
    pub fn output_prefix(&self, video: &VideoId) -> String {
        format!("{}/{}", video, self.output_dir)
    }

    /// Prefix for per-frame logs of a video (no trailing slash).
    pub fn logs_prefix(&self, video: &VideoId) -> String {
        format!("{}/{}", video, self.logs_dir)
    }

    /// Key of the extracted audio track.
    pub fn audio_key(&self, video: &VideoId) -> String {
        format!("{}/{}", video, self.audio_file)
    }

    /// Key of the final assembled video.
    pub fn output_video_key(&self, video: &VideoId) -> String {
        format!("{}/{}_processed.mp4", video, video)
    }

    /// Filename of the frame with the given index.
    pub fn frame_filename(&self, index: u32) -> String {
        format!(
            "{:0width$}{}.{}",
            index,
            self.frame_suffix,
            self.frame_extension,
            width = self.index_width
        )
    }

    /// printf-style pattern understood by FFmpeg's image2 muxer/demuxer.
    pub fn frame_pattern(&self) -> String {
        format!(
            "%0{}d{}.{}",
            self.index_width, self.frame_suffix, self.frame_extension
        )
    }

    /// Parse the index out of a frame filename.
    ///
    /// Returns `None` for names that do not follow this layout, including
    /// names whose index is not exactly `index_width` digits.
    pub fn parse_frame_index(&self, name: &str) -> Option<u32> {
        let stem = name.strip_suffix(&format!(".{}", self.frame_extension))?;
        let digits = stem.strip_suffix(&self.frame_suffix)?;
        if digits.len() != self.index_width || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Whether a filename is a frame under this layout.
    pub fn is_frame(&self, name: &str) -> bool {
        self.parse_frame_index(name).is_some()
    }
}

/// Last path segment of an object key.
pub fn key_basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
