//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use vstyle_media::{CommandTransformer, FrameTransformer, ImageStyleTransformer, Style};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::RetryConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// How long one lease request waits for a message
    pub receive_timeout: Duration,
    /// Sleep after an empty lease before asking again
    pub empty_backoff: Duration,
    /// Renew the lease this often while a frame is processing
    pub lease_renewal_interval: Option<Duration>,
    /// Upload the per-frame log next to the output
    pub upload_job_logs: bool,
    /// Exit as soon as the queue is empty
    pub terminate: bool,
    /// Exit after leasing this many messages
    pub dequeue_limit: Option<u64>,
    /// Style for jobs that carry none
    pub default_style: Option<String>,
    /// Backoff for queue transport errors
    pub transport_retry: RetryConfig,
    /// Retries for frame download and upload
    pub storage_retry: RetryConfig,
    pub transformer: TransformerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/vstyle"),
            receive_timeout: Duration::from_secs(30),
            empty_backoff: Duration::from_secs(60),
            lease_renewal_interval: Some(Duration::from_secs(30)),
            upload_job_logs: true,
            terminate: false,
            dequeue_limit: None,
            default_style: None,
            transport_retry: RetryConfig::new("lease").with_max_retries(10),
            storage_retry: RetryConfig::new("frame_transfer")
                .with_max_retries(3)
                .with_base_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(10)),
            transformer: TransformerConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let renewal_secs: u64 = std::env::var("WORKER_LEASE_RENEWAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            receive_timeout: Duration::from_secs(
                std::env::var("WORKER_RECEIVE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            empty_backoff: Duration::from_secs(
                std::env::var("WORKER_EMPTY_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            lease_renewal_interval: (renewal_secs > 0).then(|| Duration::from_secs(renewal_secs)),
            upload_job_logs: env_flag("WORKER_UPLOAD_LOGS").unwrap_or(true),
            terminate: env_flag("TERMINATE").unwrap_or(false),
            dequeue_limit: std::env::var("DEQUEUE_LIMIT").ok().and_then(|s| s.parse().ok()),
            default_style: std::env::var("STYLE_DEFAULT").ok().filter(|s| !s.is_empty()),
            transport_retry: defaults.transport_retry,
            storage_retry: defaults.storage_retry,
            transformer: TransformerConfig::from_env()?,
        })
    }
}

/// Parse a boolean environment variable.
pub fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Which transformer implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformerKind {
    /// Built-in image styles
    #[default]
    Image,
    /// External command
    Command,
}

impl FromStr for TransformerKind {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" | "builtin" => Ok(Self::Image),
            "command" | "cmd" => Ok(Self::Command),
            other => Err(WorkerError::config_error(format!("Unknown transformer '{}'", other))),
        }
    }
}

/// Transformer configuration.
#[derive(Debug, Clone, Default)]
pub struct TransformerConfig {
    pub kind: TransformerKind,
    /// Command line for [`TransformerKind::Command`]
    pub command: Option<String>,
    /// Model directory handed to the command
    pub model_dir: Option<PathBuf>,
}

impl TransformerConfig {
    pub fn from_env() -> WorkerResult<Self> {
        let kind = match std::env::var("TRANSFORMER") {
            Ok(v) => v.parse()?,
            Err(_) => TransformerKind::default(),
        };

        Ok(Self {
            kind,
            command: std::env::var("TRANSFORM_COMMAND").ok().filter(|s| !s.trim().is_empty()),
            model_dir: std::env::var("MODEL_DIR").ok().map(PathBuf::from),
        })
    }

    /// Build the transformer.
    ///
    /// A missing command or model directory is a setup error.
    pub fn build(&self, default_style: Option<&str>) -> WorkerResult<Arc<dyn FrameTransformer>> {
        match self.kind {
            TransformerKind::Image => {
                let style = match default_style {
                    Some(s) => s.parse::<Style>()?,
                    None => Style::default(),
                };
                Ok(Arc::new(ImageStyleTransformer::new(style)))
            }
            TransformerKind::Command => {
                let command = self.command.as_deref().ok_or_else(|| {
                    WorkerError::config_error("TRANSFORM_COMMAND is required for the command transformer")
                })?;

                let mut transformer = CommandTransformer::new(command)?
                    .with_default_style(default_style.map(str::to_string));
                if let Some(dir) = &self.model_dir {
                    transformer = transformer.with_model_dir(dir)?;
                }
                transformer.check_available()?;

                Ok(Arc::new(transformer))
            }
        }
    }
}
