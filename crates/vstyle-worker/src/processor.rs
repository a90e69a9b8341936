//! Processing of one frame job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;
use uuid::Uuid;
use vstyle_media::FrameTransformer;
use vstyle_models::FrameJob;
use vstyle_storage::{content_type_for, ObjectStore, StorageError};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::retry::{retry_async, RetryConfig};

/// Result of a processed frame.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub output_key: String,
    pub style: Option<String>,
    pub duration: Duration,
}

/// Fetches a frame, transforms it and stores the result.
///
/// Every step writes to fixed keys, so processing the same job twice
/// produces the same objects.
pub struct FrameProcessor {
    store: Arc<dyn ObjectStore>,
    transformer: Arc<dyn FrameTransformer>,
    work_dir: PathBuf,
    default_style: Option<String>,
    upload_logs: bool,
    retry: RetryConfig,
}

impl FrameProcessor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transformer: Arc<dyn FrameTransformer>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            transformer,
            work_dir: work_dir.into(),
            default_style: None,
            upload_logs: false,
            retry: RetryConfig::new("frame_transfer").with_max_retries(0),
        }
    }

    pub fn with_default_style(mut self, style: Option<String>) -> Self {
        self.default_style = style;
        self
    }

    pub fn with_log_upload(mut self, enabled: bool) -> Self {
        self.upload_logs = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Whether frame logs are uploaded, so callers know to capture them.
    pub fn uploads_logs(&self) -> bool {
        self.upload_logs
    }

    /// Process one frame job.
    ///
    /// The local scratch directory is removed whatever the outcome.
    pub async fn process(&self, job: &FrameJob, logger: &JobLogger) -> WorkerResult<FrameOutcome> {
        validate(job)?;

        let started = Instant::now();
        let style = job.style.clone().or_else(|| self.default_style.clone());
        logger.log_start(&format!(
            "{} with {} style {}",
            job.input_key(),
            self.transformer.name(),
            style.as_deref().unwrap_or("default")
        ));

        let scratch = self
            .work_dir
            .join(format!("{}-{}", job.video_name, Uuid::new_v4().simple()));
        let result = self.run(job, style.as_deref(), &scratch, logger).await;

        match &result {
            Ok(()) => logger.log_completion(&format!(
                "{} in {:.2}s",
                job.output_key(),
                started.elapsed().as_secs_f64()
            )),
            Err(e) => logger.log_error(&format!("frame failed: {}", e)),
        }

        if self.upload_logs {
            self.upload_log(job, logger).await;
        }

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove scratch dir {}: {}", scratch.display(), e);
            }
        }

        result.map(|()| FrameOutcome {
            output_key: job.output_key(),
            style,
            duration: started.elapsed(),
        })
    }

    async fn run(
        &self,
        job: &FrameJob,
        style: Option<&str>,
        scratch: &Path,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let input_path = scratch.join("input").join(&job.input_frame);
        let output_path = scratch.join("output").join(&job.input_frame);
        tokio::fs::create_dir_all(scratch.join("output")).await?;

        let input_key = job.input_key();
        retry_async(&self.retry, is_transient, || self.store.get_file(&input_key, &input_path))
            .await
            .into_result()
            .map_err(|e| match e {
                StorageError::NotFound(key) => {
                    WorkerError::download_failed(format!("source frame {} not found", key))
                }
                other => WorkerError::download_failed(other.to_string()),
            })?;
        logger.log_progress(&format!("downloaded {}", input_key));

        let transform_started = Instant::now();
        self.transformer
            .transform(&input_path, &output_path, style)
            .await?;
        logger.log_progress(&format!(
            "transformed in {:.2}s",
            transform_started.elapsed().as_secs_f64()
        ));

        let output_key = job.output_key();
        let content_type = content_type_for(&output_key);
        retry_async(&self.retry, is_transient, || {
            self.store.put_file(&output_path, &output_key, content_type)
        })
        .await
        .into_result()
        .map_err(|e| WorkerError::upload_failed(e.to_string()))?;
        logger.log_progress(&format!("uploaded {}", output_key));

        Ok(())
    }

    /// Upload the captured log. Failures are logged, never propagated.
    async fn upload_log(&self, job: &FrameJob, logger: &JobLogger) {
        let (Some(key), Some(text)) = (job.log_key(), logger.captured()) else {
            return;
        };

        if let Err(e) = self.store.put_bytes(&key, text.into_bytes(), "text/plain").await {
            warn!("Failed to upload frame log {}: {}", key, e);
        }
    }
}

fn is_transient(e: &StorageError) -> bool {
    !matches!(e, StorageError::NotFound(_) | StorageError::InvalidKey(_))
}

/// Reject jobs whose keys would escape their namespace.
fn validate(job: &FrameJob) -> WorkerResult<()> {
    let frame = job.input_frame.as_str();
    if frame.is_empty() || frame.contains('/') || frame.contains('\\') || frame == "." || frame == ".." {
        return Err(WorkerError::invalid_job(format!("bad frame name '{}'", frame)));
    }
    if job.input_dir.is_empty() || job.output_dir.is_empty() {
        return Err(WorkerError::invalid_job("missing input or output directory"));
    }
    if job.input_dir.trim_end_matches('/') == job.output_dir.trim_end_matches('/') {
        return Err(WorkerError::invalid_job("output directory equals input directory"));
    }
    Ok(())
}
