//! Structured job logging.
//!
//! A [`JobLogger`] is created per video or per frame job and passed
//! explicitly to the code that works on it. Every event goes to `tracing`
//! with the job's fields attached; when capture is enabled the lines are
//! also kept so they can be uploaded next to the job's output.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{error, info, warn, Span};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vstyle_models::{FrameJob, VideoId};

/// Initialize tracing: colored text by default, JSON when `LOG_FORMAT=json`.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    video: String,
    frame: Option<String>,
    message_id: Option<String>,
    operation: String,
    captured: Option<Arc<Mutex<Vec<String>>>>,
}

impl JobLogger {
    /// Logger for a whole video (split, enqueue, monitor, assemble).
    pub fn for_video(video: &VideoId, operation: &str) -> Self {
        Self {
            video: video.to_string(),
            frame: None,
            message_id: None,
            operation: operation.to_string(),
            captured: None,
        }
    }

    /// Logger for one frame job delivered as `message_id`.
    pub fn for_frame(job: &FrameJob, message_id: &str) -> Self {
        Self {
            video: job.video_name.to_string(),
            frame: Some(job.input_frame.clone()),
            message_id: Some(message_id.to_string()),
            operation: "transform_frame".to_string(),
            captured: None,
        }
    }

    /// Logger for a message whose body has not been decoded.
    pub fn for_message(message_id: &str) -> Self {
        Self {
            video: String::new(),
            frame: None,
            message_id: Some(message_id.to_string()),
            operation: "lease".to_string(),
            captured: None,
        }
    }

    /// Keep every logged line for [`JobLogger::captured`].
    pub fn with_capture(mut self) -> Self {
        self.captured = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    fn capture(&self, level: &str, message: &str) {
        if let Some(lines) = &self.captured {
            let line = format!("{} {:<5} {}", Utc::now().to_rfc3339(), level, message);
            lines.lock().unwrap_or_else(|e| e.into_inner()).push(line);
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            video = %self.video,
            frame = self.frame.as_deref().unwrap_or(""),
            message_id = self.message_id.as_deref().unwrap_or(""),
            operation = %self.operation,
            "Job started: {}", message
        );
        self.capture("INFO", &format!("started: {}", message));
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            video = %self.video,
            frame = self.frame.as_deref().unwrap_or(""),
            operation = %self.operation,
            "Job progress: {}", message
        );
        self.capture("INFO", message);
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            video = %self.video,
            frame = self.frame.as_deref().unwrap_or(""),
            message_id = self.message_id.as_deref().unwrap_or(""),
            operation = %self.operation,
            "Job warning: {}", message
        );
        self.capture("WARN", message);
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            video = %self.video,
            frame = self.frame.as_deref().unwrap_or(""),
            message_id = self.message_id.as_deref().unwrap_or(""),
            operation = %self.operation,
            "Job error: {}", message
        );
        self.capture("ERROR", message);
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            video = %self.video,
            frame = self.frame.as_deref().unwrap_or(""),
            message_id = self.message_id.as_deref().unwrap_or(""),
            operation = %self.operation,
            "Job completed: {}", message
        );
        self.capture("INFO", &format!("completed: {}", message));
    }

    /// Captured lines joined as a log file, or `None` without capture.
    pub fn captured(&self) -> Option<String> {
        self.captured.as_ref().map(|lines| {
            let lines = lines.lock().unwrap_or_else(|e| e.into_inner());
            let mut out = lines.join("\n");
            out.push('\n');
            out
        })
    }

    pub fn video(&self) -> &str {
        &self.video
    }

    pub fn frame(&self) -> Option<&str> {
        self.frame.as_deref()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            video = %self.video,
            frame = self.frame.as_deref().unwrap_or(""),
            operation = %self.operation
        )
    }
}
