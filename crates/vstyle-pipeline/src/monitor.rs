//! Completion barrier over the output namespace.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;
use vstyle_models::StorageLayout;
use vstyle_queue::clock::add_duration;
use vstyle_queue::{Clock, SystemClock};
use vstyle_storage::{list_frame_names, ObjectStore};
use vstyle_worker::{metrics, JobLogger};

use crate::error::PipelineResult;

/// How the wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Every expected output exists
    Ready { polls: u32 },
    /// Terminate flag set; nothing was checked
    Skipped,
    /// Shutdown requested between polls
    Cancelled,
    /// `max_wait` elapsed; `missing` is sorted
    DeadlineExceeded { missing: Vec<String> },
}

/// Polls the store until the expected output frames exist.
pub struct CompletionMonitor {
    store: Arc<dyn ObjectStore>,
    layout: StorageLayout,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    terminate: bool,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
}

impl CompletionMonitor {
    pub fn new(store: Arc<dyn ObjectStore>, layout: StorageLayout, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            layout,
            poll_interval: Duration::from_secs(10),
            max_wait: None,
            terminate: false,
            clock: Arc::new(SystemClock),
            shutdown,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_terminate(mut self, terminate: bool) -> Self {
        self.terminate = terminate;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Wait until `output_prefix` holds every name in `expected`.
    ///
    /// Only names in `expected` count, so the barrier opens on exact
    /// equality with the submitted total. A failed listing is retried on
    /// the next tick.
    pub async fn await_completion(
        &self,
        output_prefix: &str,
        expected: &[String],
        logger: &JobLogger,
    ) -> PipelineResult<MonitorOutcome> {
        if self.terminate {
            logger.log_warning("terminate set, skipping completion wait");
            return Ok(MonitorOutcome::Skipped);
        }

        let expected_set: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
        let deadline = self.max_wait.map(|w| add_duration(self.clock.now(), w));
        let mut missing: Vec<String> = expected_set.iter().map(|s| s.to_string()).collect();
        let mut polls = 0u32;
        let mut last_done = None;

        logger.log_start(&format!(
            "waiting for {} frames under {}",
            expected_set.len(),
            output_prefix
        ));

        loop {
            if *self.shutdown.borrow() {
                return Ok(MonitorOutcome::Cancelled);
            }

            polls += 1;
            metrics::record_completion_poll();

            match list_frame_names(self.store.as_ref(), output_prefix, &self.layout).await {
                Ok(names) => {
                    let present: BTreeSet<&str> = names.iter().map(String::as_str).collect();
                    let foreign = present.difference(&expected_set).count();
                    if foreign > 0 {
                        debug!("Ignoring {} output frames outside the submitted set", foreign);
                    }

                    missing = expected_set
                        .difference(&present)
                        .map(|s| s.to_string())
                        .collect();
                    let done = expected_set.len() - missing.len();

                    if missing.is_empty() {
                        logger.log_completion(&format!("all {} frames present after {} polls", done, polls));
                        return Ok(MonitorOutcome::Ready { polls });
                    }
                    if last_done != Some(done) {
                        logger.log_progress(&format!("{}/{} frames transformed", done, expected_set.len()));
                        last_done = Some(done);
                    }
                }
                Err(e) => logger.log_warning(&format!("listing {} failed: {}", output_prefix, e)),
            }

            if let Some(deadline) = deadline {
                if self.clock.now() >= deadline {
                    logger.log_error(&format!("deadline exceeded with {} frames missing", missing.len()));
                    return Ok(MonitorOutcome::DeadlineExceeded { missing });
                }
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = self.clock.sleep(self.poll_interval) => {}
                res = shutdown.wait_for(|stop| *stop) => {
                    if res.is_ok() {
                        return Ok(MonitorOutcome::Cancelled);
                    }
                    self.clock.sleep(self.poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seed_output_frames;
    use vstyle_models::VideoJob;
    use vstyle_queue::ManualClock;
    use vstyle_storage::MemoryStore;

    struct Setup {
        store: MemoryStore,
        clock: ManualClock,
        video: VideoJob,
        expected: Vec<String>,
        shutdown: watch::Sender<bool>,
    }

    impl Setup {
        fn new(expected: u32) -> Self {
            let video = VideoJob::new("dance.mp4", StorageLayout::default()).unwrap();
            let expected = (1..=expected).map(|i| video.layout.frame_filename(i)).collect();
            let (shutdown, _) = watch::channel(false);
            Self {
                store: MemoryStore::new(),
                clock: ManualClock::new(),
                video,
                expected,
                shutdown,
            }
        }

        fn monitor(&self) -> CompletionMonitor {
            CompletionMonitor::new(
                Arc::new(self.store.clone()),
                StorageLayout::default(),
                self.shutdown.subscribe(),
            )
            .with_clock(Arc::new(self.clock.clone()))
        }

        async fn wait(&self, monitor: &CompletionMonitor) -> MonitorOutcome {
            monitor
                .await_completion(
                    &self.video.output_prefix,
                    &self.expected,
                    &JobLogger::for_video(&self.video.id, "monitor"),
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_ready_when_outputs_present() {
        let s = Setup::new(5);
        seed_output_frames(&s.store, &s.video, 1..=5).await;

        let outcome = s.wait(&s.monitor()).await;

        assert_eq!(outcome, MonitorOutcome::Ready { polls: 1 });
        assert_eq!(s.clock.total_slept(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_terminate_skips_wait() {
        let s = Setup::new(5);

        let outcome = s.wait(&s.monitor().with_terminate(true)).await;

        assert_eq!(outcome, MonitorOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_deadline_reports_missing_frames() {
        let s = Setup::new(4);
        seed_output_frames(&s.store, &s.video, [1, 3]).await;

        let monitor = s.monitor().with_max_wait(Some(Duration::from_secs(30)));
        let outcome = s.wait(&monitor).await;

        assert_eq!(
            outcome,
            MonitorOutcome::DeadlineExceeded {
                missing: vec!["000002_frame.jpg".to_string(), "000004_frame.jpg".to_string()],
            }
        );
        assert_eq!(s.clock.total_slept(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_outputs_outside_submitted_set_do_not_count() {
        let s = Setup::new(3);
        seed_output_frames(&s.store, &s.video, [1, 2, 50, 51]).await;
        s.store
            .put_bytes("dance/output_frames/notes.txt", vec![], "text/plain")
            .await
            .unwrap();

        let monitor = s.monitor().with_max_wait(Some(Duration::ZERO));
        let outcome = s.wait(&monitor).await;

        assert_eq!(
            outcome,
            MonitorOutcome::DeadlineExceeded {
                missing: vec!["000003_frame.jpg".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_by_shutdown() {
        let s = Setup::new(3);
        let monitor = s.monitor();
        s.shutdown.send(true).unwrap();

        assert_eq!(s.wait(&monitor).await, MonitorOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_opens_once_outputs_arrive() {
        let s = Setup::new(3);
        let monitor = s.monitor();

        let writer = async {
            while s.clock.total_slept() < Duration::from_secs(20) {
                tokio::task::yield_now().await;
            }
            seed_output_frames(&s.store, &s.video, 1..=3).await;
        };
        let (outcome, ()) = tokio::join!(s.wait(&monitor), writer);

        match outcome {
            MonitorOutcome::Ready { polls } => assert!(polls >= 3),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
