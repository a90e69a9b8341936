//! Splitter: source video to frames plus audio in the video's namespace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;
use vstyle_media::MediaCodec;
use vstyle_models::{key_basename, VideoJob};
use vstyle_storage::{content_type_for, delete_prefix, ObjectStore};
use vstyle_worker::JobLogger;

use crate::error::{PipelineError, PipelineResult};
use crate::transfer::{remove_scratch, upload_frames};

/// What the split produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    pub frames_prefix: String,
    pub audio_key: String,
    pub frame_count: u32,
}

/// Runs the codec split locally and publishes the artifacts.
///
/// Re-running replaces the frame namespace, so frames from an earlier
/// split never outlive it.
pub struct Splitter {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn MediaCodec>,
    work_dir: PathBuf,
    concurrency: usize,
}

impl Splitter {
    pub fn new(store: Arc<dyn ObjectStore>, codec: Arc<dyn MediaCodec>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            codec,
            work_dir: work_dir.into(),
            concurrency: 16,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Split `video.source_video` into `video.input_prefix` and `video.audio_key`.
    pub async fn split(&self, video: &VideoJob, logger: &JobLogger) -> PipelineResult<SplitOutput> {
        if !self.store.exists(&video.source_video).await? {
            return Err(PipelineError::source_not_found(&video.source_video));
        }

        let scratch = self
            .work_dir
            .join(format!("{}-split-{}", video.id, Uuid::new_v4().simple()));
        let result = self.run(video, &scratch, logger).await;
        remove_scratch(&scratch).await;

        match &result {
            Ok(out) => logger.log_completion(&format!(
                "{} frames under {}, audio at {}",
                out.frame_count, out.frames_prefix, out.audio_key
            )),
            Err(e) => logger.log_error(&format!("split failed: {}", e)),
        }
        result
    }

    async fn run(&self, video: &VideoJob, scratch: &Path, logger: &JobLogger) -> PipelineResult<SplitOutput> {
        let source = scratch.join(key_basename(&video.source_video));
        let frames_dir = scratch.join("frames");
        let audio = scratch.join(&video.layout.audio_file);
        tokio::fs::create_dir_all(&frames_dir).await?;

        logger.log_start(&format!("downloading {}", video.source_video));
        self.store.get_file(&video.source_video, &source).await?;

        self.codec.split(&source, &frames_dir, &audio).await?;

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&frames_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if video.layout.is_frame(&name) {
                names.push(name);
            }
        }
        names.sort();

        if names.is_empty() {
            return Err(PipelineError::no_frames(format!(
                "split of {} produced no frames",
                video.source_video
            )));
        }
        logger.log_progress(&format!("extracted {} frames", names.len()));

        let stale = delete_prefix(self.store.as_ref(), &video.input_prefix).await?;
        if stale > 0 {
            logger.log_progress(&format!("removed {} stale frames", stale));
        }
        upload_frames(&self.store, &frames_dir, &video.input_prefix, &names, self.concurrency).await?;
        self.store
            .put_file(&audio, &video.audio_key, content_type_for(&video.audio_key))
            .await?;

        Ok(SplitOutput {
            frames_prefix: video.input_prefix.clone(),
            audio_key: video.audio_key.clone(),
            frame_count: names.len() as u32,
        })
    }
}
