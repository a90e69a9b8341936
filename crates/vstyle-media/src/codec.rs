//! Split a video into frames plus audio, and mux them back.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use vstyle_models::StorageLayout;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Media codec service.
#[async_trait]
pub trait MediaCodec: Send + Sync {
    /// Extract the audio track to `audio` unmodified and every frame into
    /// `frames_dir` using the layout's frame naming and rate.
    async fn split(&self, video: &Path, frames_dir: &Path, audio: &Path) -> MediaResult<()>;

    /// Encode the frame sequence in `frames_dir` at the layout's rate and
    /// merge it with `audio` into `output`.
    async fn mux(&self, frames_dir: &Path, audio: &Path, output: &Path) -> MediaResult<()>;
}

/// FFmpeg-backed codec.
pub struct FfmpegCodec {
    frame_pattern: String,
    frame_rate: u32,
    crf: u8,
    timeout_secs: Option<u64>,
}

impl FfmpegCodec {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            frame_pattern: layout.frame_pattern(),
            frame_rate: layout.frame_rate,
            crf: 20,
            timeout_secs: None,
        }
    }

    /// Kill any single FFmpeg invocation running longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn runner(&self) -> FfmpegRunner {
        match self.timeout_secs {
            Some(secs) => FfmpegRunner::new().with_timeout(secs),
            None => FfmpegRunner::new(),
        }
    }

    /// `ffmpeg -i video -vn -acodec copy audio`
    pub fn extract_audio_command(&self, video: &Path, audio: &Path) -> FfmpegCommand {
        FfmpegCommand::new(video, audio)
            .no_video()
            .output_args(["-acodec", "copy"])
    }

    /// `ffmpeg -i video -r fps frames_dir/pattern`
    pub fn extract_frames_command(&self, video: &Path, frames_dir: &Path) -> FfmpegCommand {
        FfmpegCommand::new(video, frames_dir.join(&self.frame_pattern)).frame_rate(self.frame_rate)
    }

    /// `ffmpeg -framerate fps -i frames_dir/pattern -c:v libx264 ... silent`
    pub fn encode_frames_command(&self, frames_dir: &Path, silent: &Path) -> FfmpegCommand {
        FfmpegCommand::new(frames_dir.join(&self.frame_pattern), silent)
            .input_framerate(self.frame_rate)
            .video_codec("libx264")
            .profile("high")
            .crf(self.crf)
            .pixel_format("yuv420p")
    }

    /// `ffmpeg -i silent -i audio -map 0:0 -map 1:0 -c:v copy -c:a copy output`
    pub fn merge_audio_command(&self, silent: &Path, audio: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(silent, output)
            .add_input(audio)
            .map("0:0")
            .map("1:0")
            .video_codec("copy")
            .audio_codec("copy")
    }
}

/// Path of the intermediate video without audio.
fn silent_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{}_silent.mp4", stem))
}

#[async_trait]
impl MediaCodec for FfmpegCodec {
    async fn split(&self, video: &Path, frames_dir: &Path, audio: &Path) -> MediaResult<()> {
        if !video.exists() {
            return Err(MediaError::FileNotFound(video.to_path_buf()));
        }
        tokio::fs::create_dir_all(frames_dir).await?;
        if let Some(parent) = audio.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let runner = self.runner();

        info!("Extracting audio from {}", video.display());
        runner.run(&self.extract_audio_command(video, audio)).await?;

        info!("Extracting frames from {} at {} fps", video.display(), self.frame_rate);
        runner
            .run_with_progress(&self.extract_frames_command(video, frames_dir), |p| {
                debug!(frame = p.frame, fps = p.fps, "Frame extraction progress");
            })
            .await?;

        Ok(())
    }

    async fn mux(&self, frames_dir: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        if !audio.exists() {
            return Err(MediaError::FileNotFound(audio.to_path_buf()));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let runner = self.runner();
        let silent = silent_path(output);

        info!("Encoding frames from {}", frames_dir.display());
        runner
            .run_with_progress(&self.encode_frames_command(frames_dir, &silent), |p| {
                debug!(frame = p.frame, speed = p.speed, "Encoding progress");
            })
            .await?;

        info!("Merging audio into {}", output.display());
        runner
            .run(&self.merge_audio_command(&silent, audio, output))
            .await?;

        tokio::fs::remove_file(&silent).await?;
        Ok(())
    }
}
