//! Worker loop.
//!
//! One worker handles one frame at a time:
//! `Idle -> Leasing -> Processing -> Acking -> Idle`. A frame that fails
//! anywhere before the ack stays in the queue and is redelivered once its
//! lease expires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};
use vstyle_models::FrameJob;
use vstyle_queue::{Clock, FrameQueue, Lease, LeaseOutcome, SystemClock};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::processor::{FrameOutcome, FrameProcessor};
use crate::retry::FailureTracker;

/// Counters returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub leased: u64,
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

/// Why the loop stopped.
enum Exit {
    Shutdown,
    QueueEmpty,
    DequeueLimit,
}

/// Frame worker that processes jobs from the queue.
pub struct FrameWorker {
    config: WorkerConfig,
    queue: Arc<dyn FrameQueue>,
    processor: FrameProcessor,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
}

impl FrameWorker {
    /// Create a new worker.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn FrameQueue>,
        processor: FrameProcessor,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            queue,
            processor,
            clock: Arc::new(SystemClock),
            shutdown,
        }
    }

    /// Use a different time source for sleeps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run until shutdown, an empty queue with `terminate`, or the dequeue limit.
    ///
    /// Queue transport errors are retried with backoff. With `terminate` set,
    /// running out of retries is an error.
    pub async fn run(&self) -> WorkerResult<WorkerStats> {
        let mut stats = WorkerStats::default();
        let mut failures = FailureTracker::new(5);

        info!(
            terminate = self.config.terminate,
            dequeue_limit = ?self.config.dequeue_limit,
            "Starting frame worker"
        );

        let exit = loop {
            if *self.shutdown.borrow() {
                break Exit::Shutdown;
            }
            if self.config.dequeue_limit.is_some_and(|limit| stats.leased >= limit) {
                break Exit::DequeueLimit;
            }

            match self.queue.lease(self.config.receive_timeout).await {
                Ok(LeaseOutcome::Leased(lease)) => {
                    failures.record_success();
                    stats.leased += 1;
                    self.handle(lease, &mut stats).await;
                }
                Ok(LeaseOutcome::Empty) => {
                    failures.record_success();
                    if self.config.terminate {
                        break Exit::QueueEmpty;
                    }
                    debug!("Queue empty, sleeping {:?}", self.config.empty_backoff);
                    self.sleep_or_shutdown(self.config.empty_backoff).await;
                }
                Err(e) => {
                    let attempt = failures.failure_count() + 1;
                    if self.config.terminate && attempt > self.config.transport_retry.max_retries {
                        return Err(WorkerError::Queue(e));
                    }
                    if failures.record_failure() {
                        warn!("Lease failed (attempt {}): {}", attempt, e);
                    }
                    let delay = self.config.transport_retry.delay_for_attempt(attempt);
                    self.sleep_or_shutdown(delay).await;
                }
            }
        };

        match exit {
            Exit::Shutdown => info!("Shutdown signal received, stopping worker"),
            Exit::QueueEmpty => info!("Queue empty, terminating"),
            Exit::DequeueLimit => info!("Dequeue limit of {} reached", stats.leased),
        }
        info!(
            leased = stats.leased,
            processed = stats.processed,
            failed = stats.failed,
            dead_lettered = stats.dead_lettered,
            "Frame worker stopped"
        );

        Ok(stats)
    }

    /// Process one leased message and ack it on success.
    async fn handle(&self, lease: Lease, stats: &mut WorkerStats) {
        let max_deliveries = self.queue.max_deliveries();
        if lease.delivery_count > max_deliveries {
            let reason = format!(
                "delivered {} times, limit is {}",
                lease.delivery_count, max_deliveries
            );
            self.dead_letter(&lease, &reason, "max_deliveries", stats).await;
            return;
        }

        let job = match lease.frame_job() {
            Ok(job) => job,
            Err(e) => {
                self.dead_letter(&lease, &e.to_string(), "malformed", stats).await;
                return;
            }
        };

        let mut logger = JobLogger::for_frame(&job, &lease.message_id);
        if self.processor.uploads_logs() {
            logger = logger.with_capture();
        }
        if lease.is_redelivery() {
            logger.log_progress(&format!("redelivery {}", lease.delivery_count));
        }

        let span = logger.create_span();
        match self.process(&lease, &job, &logger).instrument(span).await {
            Ok(outcome) => match self.queue.ack(&lease).await {
                Ok(()) => {
                    stats.processed += 1;
                    metrics::record_frame_processed(
                        outcome.style.as_deref().unwrap_or("default"),
                        outcome.duration.as_secs_f64(),
                    );
                    debug!("Acknowledged {}", lease.message_id);
                }
                Err(e) => {
                    stats.failed += 1;
                    metrics::record_frame_failed(true);
                    logger.log_error(&format!("ack failed, frame will be redelivered: {}", e));
                }
            },
            Err(WorkerError::InvalidJob(reason)) => {
                self.dead_letter(&lease, &reason, "invalid", stats).await;
            }
            Err(e) => {
                stats.failed += 1;
                metrics::record_frame_failed(e.is_retryable());
                logger.log_warning(&format!("left for redelivery: {}", e));
            }
        }
    }

    /// Run the processor, renewing the lease while it works.
    async fn process(
        &self,
        lease: &Lease,
        job: &FrameJob,
        logger: &JobLogger,
    ) -> WorkerResult<FrameOutcome> {
        let Some(interval) = self.config.lease_renewal_interval else {
            return self.processor.process(job, logger).await;
        };

        let work = self.processor.process(job, logger);
        tokio::pin!(work);

        loop {
            tokio::select! {
                biased;
                result = &mut work => return result,
                _ = self.clock.sleep(interval) => {
                    if let Err(e) = self.queue.renew(lease).await {
                        logger.log_warning(&format!("lease renewal failed: {}", e));
                    }
                }
            }
        }
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str, kind: &str, stats: &mut WorkerStats) {
        let logger = JobLogger::for_message(&lease.message_id);
        match self.queue.dead_letter(lease, reason).await {
            Ok(()) => {
                stats.dead_lettered += 1;
                metrics::record_frame_dead_lettered(kind);
                logger.log_warning(&format!("dead-lettered ({}): {}", kind, reason));
            }
            Err(e) => {
                stats.failed += 1;
                logger.log_error(&format!("failed to dead-letter: {}", e));
            }
        }
    }

    /// Sleep for `duration`, returning early on shutdown.
    ///
    /// A dropped shutdown sender can no longer signal, so the full sleep applies.
    async fn sleep_or_shutdown(&self, duration: Duration) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = self.clock.sleep(duration) => {}
            sender_gone = async { shutdown.wait_for(|stop| *stop).await.is_err() } => {
                if sender_gone {
                    self.clock.sleep(duration).await;
                }
            }
        }
    }
}
