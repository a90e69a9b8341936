//! Assembler: transformed frames plus original audio to the output video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;
use vstyle_media::MediaCodec;
use vstyle_models::{key_basename, VideoJob};
use vstyle_storage::{content_type_for, list_frame_names, ObjectStore};
use vstyle_worker::JobLogger;

use crate::error::{PipelineError, PipelineResult};
use crate::transfer::{download_frames, remove_scratch};

/// Result of an assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleOutput {
    pub output_key: String,
    pub frame_count: u32,
}

pub struct Assembler {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn MediaCodec>,
    work_dir: PathBuf,
    concurrency: usize,
}

impl Assembler {
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

    /// Mux the `expected` output frames of `video` with its audio and
    /// upload the result to `video.output_video_key`.
    ///
    /// The output frames must be exactly the indices
    /// `first_index..first_index + expected`.
    pub async fn assemble(
        &self,
        video: &VideoJob,
        expected: u32,
        logger: &JobLogger,
    ) -> PipelineResult<AssembleOutput> {
        let names = list_frame_names(self.store.as_ref(), &video.output_prefix, &video.layout).await?;
        check_sequence(video, &names, expected)?;

        let scratch = self
            .work_dir
            .join(format!("{}-assemble-{}", video.id, Uuid::new_v4().simple()));
        let result = self.run(video, &names, &scratch, logger).await;
        remove_scratch(&scratch).await;

        match &result {
            Ok(out) => logger.log_completion(&format!("{} frames into {}", out.frame_count, out.output_key)),
            Err(e) => logger.log_error(&format!("assembly failed: {}", e)),
        }
        result
    }

    async fn run(
        &self,
        video: &VideoJob,
        names: &[String],
        scratch: &Path,
        logger: &JobLogger,
    ) -> PipelineResult<AssembleOutput> {
        let frames_dir = scratch.join("frames");
        let audio = scratch.join(&video.layout.audio_file);
        let output = scratch.join(key_basename(&video.output_video_key));
        tokio::fs::create_dir_all(&frames_dir).await?;

        logger.log_start(&format!("downloading {} frames", names.len()));
        download_frames(&self.store, &video.output_prefix, &frames_dir, names, self.concurrency).await?;
        self.store.get_file(&video.audio_key, &audio).await?;

        logger.log_progress("muxing");
        self.codec.mux(&frames_dir, &audio, &output).await?;

        self.store
            .put_file(&output, &video.output_video_key, content_type_for(&video.output_video_key))
            .await?;

        Ok(AssembleOutput {
            output_key: video.output_video_key.clone(),
            frame_count: names.len() as u32,
        })
    }
}

/// `names` (sorted) must be the contiguous run of `expected` frames from
/// the layout's first index.
fn check_sequence(video: &VideoJob, names: &[String], expected: u32) -> PipelineResult<()> {
    let found = names.len() as u32;
    if found != expected {
        return Err(PipelineError::FrameCountMismatch { expected, found });
    }
    if expected == 0 {
        return Err(PipelineError::no_frames(format!("nothing to assemble under {}", video.output_prefix)));
    }

    for (offset, name) in names.iter().enumerate() {
        let index = video.layout.first_index + offset as u32;
        if video.layout.parse_frame_index(name) != Some(index) {
            return Err(PipelineError::FrameSequenceGap { index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_output_frames, FakeCodec};
    use std::sync::atomic::Ordering;
    use vstyle_models::StorageLayout;
    use vstyle_storage::MemoryStore;

    struct Setup {
        store: MemoryStore,
        codec: Arc<FakeCodec>,
        video: VideoJob,
        dir: tempfile::TempDir,
    }

    async fn setup() -> Setup {
        let store = MemoryStore::new();
        let video = VideoJob::new("dance.mp4", StorageLayout::default()).unwrap();
        store.put_bytes(&video.audio_key, b"aac".to_vec(), "audio/aac").await.unwrap();
        Setup {
            store,
            codec: Arc::new(FakeCodec::new(0)),
            video,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    impl Setup {
        fn assembler(&self) -> Assembler {
            Assembler::new(Arc::new(self.store.clone()), self.codec.clone(), self.dir.path())
        }

        async fn assemble(&self, expected: u32) -> PipelineResult<AssembleOutput> {
            self.assembler()
                .assemble(&self.video, expected, &JobLogger::for_video(&self.video.id, "assemble"))
                .await
        }
    }

    #[tokio::test]
    async fn test_assembles_frames_in_index_order() {
        let s = setup().await;
        seed_output_frames(&s.store, &s.video, (1..=12).rev()).await;

        let out = s.assemble(12).await.unwrap();

        assert_eq!(out.output_key, "dance/dance_processed.mp4");
        assert_eq!(out.frame_count, 12);
        let video = String::from_utf8(s.store.get_bytes(&out.output_key).await.unwrap()).unwrap();
        let frames: Vec<&str> = video.lines().filter(|l| l.starts_with("FRAME-")).collect();
        let want: Vec<String> = (1..=12).map(|i| format!("FRAME-{}", i)).collect();
        assert_eq!(frames, want);
        assert!(video.ends_with("audio=aac"));
        assert_eq!(std::fs::read_dir(s.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_fatal() {
        let s = setup().await;
        seed_output_frames(&s.store, &s.video, 1..=10).await;

        let err = s.assemble(12).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::FrameCountMismatch { expected: 12, found: 10 }
        ));
        assert_eq!(s.codec.muxes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gap_in_sequence_is_fatal() {
        let s = setup().await;
        seed_output_frames(&s.store, &s.video, [1, 2, 4]).await;

        let err = s.assemble(3).await.unwrap_err();

        assert!(matches!(err, PipelineError::FrameSequenceGap { index: 3 }));
        assert!(!s.store.exists(&s.video.output_video_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_audio_fails() {
        let s = setup().await;
        s.store.delete(&s.video.audio_key).await.unwrap();
        seed_output_frames(&s.store, &s.video, 1..=2).await;

        let err = s.assemble(2).await.unwrap_err();

        assert!(matches!(err, PipelineError::Storage(_)));
        assert_eq!(std::fs::read_dir(s.dir.path()).unwrap().count(), 0);
    }
}
