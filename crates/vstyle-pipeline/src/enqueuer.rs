//! Enqueuer: one frame job per input frame, published in batches.

use std::sync::Arc;

use vstyle_models::{FrameJob, VideoJob};
use vstyle_queue::FrameQueue;
use vstyle_storage::{list_frame_names, ObjectStore};
use vstyle_worker::{metrics, JobLogger};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::{PipelineError, PipelineResult};

/// What was submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    /// Authoritative total the completion monitor waits for
    pub submitted: u32,
    pub batches: u32,
    /// Submitted frame names, sorted
    pub frame_names: Vec<String>,
}

pub struct Enqueuer {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn FrameQueue>,
    batch_size: usize,
}

impl Enqueuer {
    pub fn new(store: Arc<dyn ObjectStore>, queue: Arc<dyn FrameQueue>) -> Self {
        Self {
            store,
            queue,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Publish a job for every frame under `video.input_prefix`, in
    /// filename order, stopping after `limit` jobs.
    pub async fn enqueue(
        &self,
        video: &VideoJob,
        limit: Option<u32>,
        logger: &JobLogger,
    ) -> PipelineResult<EnqueueReport> {
        let mut names = list_frame_names(self.store.as_ref(), &video.input_prefix, &video.layout).await?;
        if names.is_empty() {
            return Err(PipelineError::no_frames(format!(
                "nothing to enqueue under {}",
                video.input_prefix
            )));
        }

        names.sort();
        let available = names.len();
        if let Some(limit) = limit {
            names.truncate(limit as usize);
        }
        logger.log_start(&format!(
            "enqueueing {} of {} frames (batch size {})",
            names.len(),
            available,
            self.batch_size
        ));

        let report = self.enqueue_frames(video, names, logger).await?;
        logger.log_completion(&format!(
            "{} jobs in {} batches",
            report.submitted, report.batches
        ));
        Ok(report)
    }

    /// Publish jobs for exactly `names`, in the given order.
    pub async fn enqueue_frames(
        &self,
        video: &VideoJob,
        names: Vec<String>,
        logger: &JobLogger,
    ) -> PipelineResult<EnqueueReport> {
        let mut report = EnqueueReport::default();

        for chunk in names.chunks(self.batch_size) {
            let jobs: Vec<FrameJob> = chunk
                .iter()
                .map(|name| FrameJob::for_frame(video, name.as_str()))
                .collect();

            let sent = self.queue.send_batch(&jobs).await?;
            report.batches += 1;
            report.submitted += sent as u32;
            logger.log_progress(&format!(
                "batch {}: {} jobs ({} total)",
                report.batches, sent, report.submitted
            ));
        }

        metrics::record_frames_enqueued(u64::from(report.submitted));
        report.frame_names = names;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seed_input_frames;
    use std::time::Duration;
    use vstyle_models::StorageLayout;
    use vstyle_queue::MemoryQueue;
    use vstyle_storage::MemoryStore;

    struct Setup {
        store: MemoryStore,
        queue: MemoryQueue,
        video: VideoJob,
        enqueuer: Enqueuer,
    }

    async fn setup(frames: u32) -> Setup {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new(Duration::from_secs(300));
        let video = VideoJob::new("dance.mp4", StorageLayout::default())
            .unwrap()
            .with_style(Some("sepia".to_string()));
        seed_input_frames(&store, &video, frames).await;
        let enqueuer = Enqueuer::new(Arc::new(store.clone()), Arc::new(queue.clone()));
        Setup {
            store,
            queue,
            video,
            enqueuer,
        }
    }

    fn logger(video: &VideoJob) -> JobLogger {
        JobLogger::for_video(&video.id, "enqueue")
    }

    #[tokio::test]
    async fn test_small_video_single_batch() {
        let s = setup(120).await;

        let report = s.enqueuer.enqueue(&s.video, None, &logger(&s.video)).await.unwrap();

        assert_eq!(report.submitted, 120);
        assert_eq!(report.batches, 1);
        assert_eq!(s.queue.batch_sizes(), vec![120]);
    }

    #[tokio::test]
    async fn test_final_partial_batch_is_flushed() {
        let s = setup(1200).await;

        let report = s.enqueuer.enqueue(&s.video, None, &logger(&s.video)).await.unwrap();

        assert_eq!(report.submitted, 1200);
        assert_eq!(s.queue.batch_sizes(), vec![500, 500, 200]);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_batch_size() {
        let s = setup(1000).await;

        s.enqueuer.enqueue(&s.video, None, &logger(&s.video)).await.unwrap();

        assert_eq!(s.queue.batch_sizes(), vec![500, 500]);
    }

    #[tokio::test]
    async fn test_limit_submits_first_frames_in_order() {
        let s = setup(120).await;

        let report = s.enqueuer.enqueue(&s.video, Some(50), &logger(&s.video)).await.unwrap();

        assert_eq!(report.submitted, 50);
        assert_eq!(report.frame_names.len(), 50);
        assert_eq!(report.frame_names.first().map(String::as_str), Some("000001_frame.jpg"));
        assert_eq!(report.frame_names.last().map(String::as_str), Some("000050_frame.jpg"));
        assert_eq!(s.queue.payloads().len(), 50);
    }

    #[tokio::test]
    async fn test_limit_above_frame_count_submits_all() {
        let s = setup(30).await;

        let report = s.enqueuer.enqueue(&s.video, Some(500), &logger(&s.video)).await.unwrap();

        assert_eq!(report.submitted, 30);
    }

    #[tokio::test]
    async fn test_zero_limit_submits_nothing() {
        let s = setup(30).await;

        let report = s.enqueuer.enqueue(&s.video, Some(0), &logger(&s.video)).await.unwrap();

        assert_eq!(report.submitted, 0);
        assert_eq!(report.batches, 0);
        assert!(s.queue.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_locate_source_and_destination() {
        let s = setup(3).await;
        s.store
            .put_bytes("dance/input_frames/thumbs.db", vec![0], "application/octet-stream")
            .await
            .unwrap();

        s.enqueuer.enqueue(&s.video, None, &logger(&s.video)).await.unwrap();

        let jobs: Vec<FrameJob> = s
            .queue
            .payloads()
            .iter()
            .map(|p| FrameJob::from_json(p).unwrap())
            .collect();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].input_key(), "dance/input_frames/000001_frame.jpg");
        assert_eq!(jobs[0].output_key(), "dance/output_frames/000001_frame.jpg");
        assert_eq!(jobs[2].input_frame, "000003_frame.jpg");
        assert_eq!(jobs[0].style.as_deref(), Some("sepia"));
    }

    #[tokio::test]
    async fn test_empty_namespace_is_an_error() {
        let s = setup(0).await;

        let err = s.enqueuer.enqueue(&s.video, None, &logger(&s.video)).await.unwrap_err();

        assert!(matches!(err, PipelineError::NoFrames(_)));
    }
}
