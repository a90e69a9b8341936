//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use vstyle_models::StorageLayout;
use vstyle_worker::env_flag;

/// Frames published per `send_batch` call.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Local directory for split and assembly scratch space
    pub work_dir: PathBuf,
    pub batch_size: usize,
    /// Sleep between completion checks
    pub poll_interval: Duration,
    /// Give up waiting for outputs after this long
    pub max_wait: Option<Duration>,
    /// Re-enqueue missing frames this many times before failing
    pub reconcile_attempts: u32,
    /// Stop once frames are queued; assembly is left to a later `assemble`
    pub terminate: bool,
    /// Parallel frame uploads and downloads
    pub transfer_concurrency: usize,
    /// Delete input and output frames once the video is assembled
    pub cleanup_frames: bool,
    /// Kill any single FFmpeg invocation running longer than this
    pub ffmpeg_timeout_secs: Option<u64>,
    pub layout: StorageLayout,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/vstyle-pipeline"),
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(10),
            max_wait: None,
            reconcile_attempts: 2,
            terminate: false,
            transfer_concurrency: 16,
            cleanup_frames: false,
            ffmpeg_timeout_secs: None,
            layout: StorageLayout::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut layout = defaults.layout;
        if let Some(rate) = std::env::var("FRAME_RATE").ok().and_then(|s| s.parse().ok()) {
            layout.frame_rate = rate;
        }

        Self {
            work_dir: std::env::var("PIPELINE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            batch_size: std::env::var("ENQUEUE_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            poll_interval: Duration::from_secs(
                std::env::var("MONITOR_POLL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            max_wait: std::env::var("MONITOR_MAX_WAIT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            reconcile_attempts: std::env::var("RECONCILE_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reconcile_attempts),
            terminate: env_flag("TERMINATE").unwrap_or(false),
            transfer_concurrency: std::env::var("TRANSFER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.transfer_concurrency),
            cleanup_frames: env_flag("PIPELINE_CLEANUP_FRAMES").unwrap_or(false),
            ffmpeg_timeout_secs: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            layout,
        }
    }
}
