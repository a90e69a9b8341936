//! One video through split, enqueue, completion barrier and assembly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::info;
use vstyle_media::MediaCodec;
use vstyle_models::{VideoId, VideoJob};
use vstyle_queue::{Clock, FrameQueue, SystemClock};
use vstyle_storage::{delete_prefix, ObjectStore};
use vstyle_worker::JobLogger;

use crate::assembler::Assembler;
use crate::config::PipelineConfig;
use crate::enqueuer::Enqueuer;
use crate::error::{PipelineError, PipelineResult};
use crate::monitor::{CompletionMonitor, MonitorOutcome};
use crate::splitter::Splitter;

/// Wall time per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub split: Duration,
    pub enqueue: Duration,
    pub transform_wait: Duration,
    pub assembly: Duration,
    pub total: Duration,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub video: VideoId,
    pub frame_count: u32,
    pub submitted: u32,
    /// Times missing frames were re-enqueued
    pub reconciliations: u32,
    /// `None` when a bounded run stopped after enqueueing
    pub output_key: Option<String>,
    pub timings: StageTimings,
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn FrameQueue>,
    codec: Arc<dyn MediaCodec>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn FrameQueue>,
        codec: Arc<dyn MediaCodec>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            codec,
            clock: Arc::new(SystemClock),
            shutdown,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn splitter(&self) -> Splitter {
        Splitter::new(self.store.clone(), self.codec.clone(), &self.config.work_dir)
            .with_concurrency(self.config.transfer_concurrency)
    }

    pub fn enqueuer(&self) -> Enqueuer {
        Enqueuer::new(self.store.clone(), self.queue.clone()).with_batch_size(self.config.batch_size)
    }

    pub fn monitor(&self) -> CompletionMonitor {
        CompletionMonitor::new(self.store.clone(), self.config.layout.clone(), self.shutdown.clone())
            .with_poll_interval(self.config.poll_interval)
            .with_max_wait(self.config.max_wait)
            .with_terminate(self.config.terminate)
            .with_clock(self.clock.clone())
    }

    pub fn assembler(&self) -> Assembler {
        Assembler::new(self.store.clone(), self.codec.clone(), &self.config.work_dir)
            .with_concurrency(self.config.transfer_concurrency)
    }

    /// Run every stage for `video`.
    ///
    /// `video.submission_cap` limits the enqueued frames, and the submitted
    /// total is what completion and assembly check against. Outputs left by an
    /// earlier run of the same video are cleared before enqueueing. With
    /// `terminate` set the run stops once the frames are queued.
    pub async fn run(&self, video: VideoJob) -> PipelineResult<PipelineReport> {
        let started = Instant::now();
        let mut timings = StageTimings::default();
        info!(video = %video.id, source = %video.source_video, "Pipeline started");

        let stage = Instant::now();
        let split = self
            .splitter()
            .split(&video, &JobLogger::for_video(&video.id, "split"))
            .await?;
        let video = video.with_frame_count(split.frame_count);
        timings.split = stage.elapsed();

        let stage = Instant::now();
        let enqueue_logger = JobLogger::for_video(&video.id, "enqueue");
        let stale = delete_prefix(self.store.as_ref(), &video.output_prefix).await?;
        if stale > 0 {
            enqueue_logger.log_progress(&format!(
                "removed {} outputs of an earlier run under {}",
                stale, video.output_prefix
            ));
        }
        let enqueuer = self.enqueuer();
        let report = enqueuer
            .enqueue(&video, video.submission_cap, &enqueue_logger)
            .await?;
        timings.enqueue = stage.elapsed();
        if report.submitted == 0 {
            return Err(PipelineError::no_frames(format!(
                "submission cap of 0 for {}",
                video.id
            )));
        }

        let stage = Instant::now();
        let monitor = self.monitor();
        let monitor_logger = JobLogger::for_video(&video.id, "monitor");
        let mut reconciliations = 0;
        loop {
            match monitor
                .await_completion(&video.output_prefix, &report.frame_names, &monitor_logger)
                .await?
            {
                MonitorOutcome::Ready { .. } => break,
                MonitorOutcome::Skipped => {
                    timings.total = started.elapsed();
                    info!(
                        video = %video.id,
                        submitted = report.submitted,
                        "Bounded run: {} frames queued, assembly skipped",
                        report.submitted
                    );
                    return Ok(PipelineReport {
                        video: video.id.clone(),
                        frame_count: video.frame_count,
                        submitted: report.submitted,
                        reconciliations: 0,
                        output_key: None,
                        timings,
                    });
                }
                MonitorOutcome::Cancelled => return Err(PipelineError::Cancelled),
                MonitorOutcome::DeadlineExceeded { missing } => {
                    if reconciliations >= self.config.reconcile_attempts {
                        return Err(PipelineError::Incomplete {
                            missing: missing.len(),
                        });
                    }
                    reconciliations += 1;
                    monitor_logger.log_warning(&format!(
                        "re-enqueueing {} missing frames (attempt {}/{})",
                        missing.len(),
                        reconciliations,
                        self.config.reconcile_attempts
                    ));
                    enqueuer.enqueue_frames(&video, missing, &enqueue_logger).await?;
                }
            }
        }
        timings.transform_wait = stage.elapsed();

        let stage = Instant::now();
        let assembled = self
            .assembler()
            .assemble(&video, report.submitted, &JobLogger::for_video(&video.id, "assemble"))
            .await?;
        timings.assembly = stage.elapsed();

        if self.config.cleanup_frames {
            delete_prefix(self.store.as_ref(), &video.input_prefix).await?;
            delete_prefix(self.store.as_ref(), &video.output_prefix).await?;
        }

        timings.total = started.elapsed();
        info!(
            video = %video.id,
            frames = video.frame_count,
            submitted = report.submitted,
            reconciliations,
            split_secs = timings.split.as_secs_f64(),
            enqueue_secs = timings.enqueue.as_secs_f64(),
            transform_wait_secs = timings.transform_wait.as_secs_f64(),
            assembly_secs = timings.assembly.as_secs_f64(),
            total_secs = timings.total.as_secs_f64(),
            "Pipeline finished: {}",
            assembled.output_key
        );

        Ok(PipelineReport {
            video: video.id.clone(),
            frame_count: video.frame_count,
            submitted: report.submitted,
            reconciliations,
            output_key: Some(assembled.output_key),
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCodec, UppercaseTransformer};
    use tokio::task::JoinHandle;
    use vstyle_models::StorageLayout;
    use vstyle_queue::{ManualClock, MemoryQueue};
    use vstyle_storage::MemoryStore;
    use vstyle_worker::{FrameProcessor, FrameWorker, WorkerConfig, WorkerResult, WorkerStats};

    struct Harness {
        store: MemoryStore,
        queue: MemoryQueue,
        worker_clock: ManualClock,
        shutdown: watch::Sender<bool>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let store = MemoryStore::new();
            store.put_bytes("dance.mp4", b"video".to_vec(), "video/mp4").await.unwrap();
            let worker_clock = ManualClock::new();
            let queue = MemoryQueue::with_clock(Duration::from_secs(86_400), Arc::new(worker_clock.clone()));
            let (shutdown, _) = watch::channel(false);
            Self {
                store,
                queue,
                worker_clock,
                shutdown,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn config(&self) -> PipelineConfig {
            PipelineConfig {
                work_dir: self.dir.path().join("pipeline"),
                ..Default::default()
            }
        }

        fn pipeline(&self, config: PipelineConfig) -> Pipeline {
            Pipeline::new(
                config,
                Arc::new(self.store.clone()),
                Arc::new(self.queue.clone()),
                Arc::new(FakeCodec::new(120)),
                self.shutdown.subscribe(),
            )
            .with_clock(Arc::new(ManualClock::new()))
        }

        fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<WorkerResult<WorkerStats>>> {
            (0..count)
                .map(|i| {
                    let work_dir = self.dir.path().join(format!("worker-{}", i));
                    let config = WorkerConfig {
                        work_dir: work_dir.clone(),
                        receive_timeout: Duration::from_secs(1),
                        empty_backoff: Duration::from_secs(1),
                        lease_renewal_interval: None,
                        upload_job_logs: false,
                        ..Default::default()
                    };
                    let processor = FrameProcessor::new(
                        Arc::new(self.store.clone()),
                        Arc::new(UppercaseTransformer),
                        work_dir,
                    );
                    let worker = FrameWorker::new(
                        config,
                        Arc::new(self.queue.clone()),
                        processor,
                        self.shutdown.subscribe(),
                    )
                    .with_clock(Arc::new(self.worker_clock.clone()));
                    tokio::spawn(async move { worker.run().await })
                })
                .collect()
        }

        async fn stop(&self, workers: Vec<JoinHandle<WorkerResult<WorkerStats>>>) -> u64 {
            self.shutdown.send(true).unwrap();
            let mut processed = 0;
            for handle in workers {
                processed += handle.await.unwrap().unwrap().processed;
            }
            processed
        }

        async fn output_lines(&self, key: &str) -> Vec<String> {
            let bytes = self.store.get_bytes(key).await.unwrap();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .filter(|l| !l.starts_with("audio="))
                .map(str::to_string)
                .collect()
        }

        fn keys_under(&self, prefix: &str) -> usize {
            self.store.keys().iter().filter(|k| k.starts_with(prefix)).count()
        }
    }

    fn video(cap: Option<u32>) -> VideoJob {
        VideoJob::new("dance.mp4", StorageLayout::default())
            .unwrap()
            .with_style(Some("sepia".to_string()))
            .with_submission_cap(cap)
    }

    #[tokio::test]
    async fn test_end_to_end_single_batch() {
        let h = Harness::new().await;
        let workers = h.spawn_workers(2);

        let report = h.pipeline(h.config()).run(video(None)).await.unwrap();
        let processed = h.stop(workers).await;

        assert_eq!(report.frame_count, 120);
        assert_eq!(report.submitted, 120);
        assert_eq!(report.reconciliations, 0);
        assert_eq!(report.output_key.as_deref(), Some("dance/dance_processed.mp4"));
        assert_eq!(h.queue.batch_sizes(), vec![120]);
        assert_eq!(processed, 120);
        assert!(h.queue.payloads().is_empty());

        let lines = h.output_lines(report.output_key.as_deref().unwrap()).await;
        let want: Vec<String> = (1..=120).map(|i| format!("sepia:FRAME-{}", i)).collect();
        assert_eq!(lines, want);
    }

    #[tokio::test]
    async fn test_rerun_never_assembles_outputs_of_an_earlier_run() {
        let h = Harness::new().await;
        let workers = h.spawn_workers(2);
        h.pipeline(h.config()).run(video(None)).await.unwrap();
        h.stop(workers).await;

        h.shutdown.send_replace(false);
        let config = PipelineConfig {
            max_wait: Some(Duration::from_secs(30)),
            reconcile_attempts: 0,
            ..h.config()
        };
        let rerun = video(None).with_style(Some("invert".to_string()));
        let err = h.pipeline(config).run(rerun.clone()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Incomplete { missing: 120 }));
        assert_eq!(h.keys_under("dance/output_frames/"), 0);
        assert_eq!(h.queue.payloads().len(), 120);

        let workers = h.spawn_workers(2);
        let report = h.pipeline(h.config()).run(rerun).await.unwrap();
        h.stop(workers).await;

        let lines = h.output_lines(report.output_key.as_deref().unwrap()).await;
        assert_eq!(lines.len(), 120);
        assert!(lines.iter().all(|l| l.starts_with("invert:")));
    }

    #[tokio::test]
    async fn test_submission_cap_bounds_the_barrier() {
        let h = Harness::new().await;
        let workers = h.spawn_workers(1);
        let config = PipelineConfig {
            cleanup_frames: true,
            ..h.config()
        };

        let report = h.pipeline(config).run(video(Some(50))).await.unwrap();
        h.stop(workers).await;

        assert_eq!(report.frame_count, 120);
        assert_eq!(report.submitted, 50);
        assert_eq!(h.queue.batch_sizes(), vec![50]);
        assert_eq!(h.output_lines(report.output_key.as_deref().unwrap()).await.len(), 50);
        assert_eq!(h.keys_under("dance/input_frames/"), 0);
        assert_eq!(h.keys_under("dance/output_frames/"), 0);
        assert!(h.store.exists("dance/audio.aac").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_frames_are_reconciled_then_incomplete() {
        let h = Harness::new().await;
        let config = PipelineConfig {
            max_wait: Some(Duration::from_secs(30)),
            reconcile_attempts: 1,
            ..h.config()
        };

        let err = h.pipeline(config).run(video(None)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Incomplete { missing: 120 }));
        assert_eq!(h.queue.batch_sizes(), vec![120, 120]);
    }

    #[tokio::test]
    async fn test_terminate_stops_after_enqueue() {
        let h = Harness::new().await;
        let config = PipelineConfig {
            terminate: true,
            ..h.config()
        };

        let report = h.pipeline(config).run(video(None)).await.unwrap();

        assert_eq!(report.submitted, 120);
        assert_eq!(report.output_key, None);
        assert_eq!(h.queue.batch_sizes(), vec![120]);
        assert!(!h.store.exists("dance/dance_processed.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_source_enqueues_nothing() {
        let h = Harness::new().await;
        h.store.delete("dance.mp4").await.unwrap();

        let err = h.pipeline(h.config()).run(video(None)).await.unwrap_err();

        assert!(matches!(err, PipelineError::SourceNotFound(_)));
        assert!(h.queue.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_the_wait() {
        let h = Harness::new().await;
        let pipeline = h.pipeline(h.config());
        h.shutdown.send(true).unwrap();

        let err = pipeline.run(video(None)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
    }
}
