//! Prometheus metrics.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_PROCESSED_TOTAL: &str = "vstyle_frames_processed_total";
    pub const FRAMES_FAILED_TOTAL: &str = "vstyle_frames_failed_total";
    pub const FRAMES_DEAD_LETTERED_TOTAL: &str = "vstyle_frames_dead_lettered_total";
    pub const FRAMES_ENQUEUED_TOTAL: &str = "vstyle_frames_enqueued_total";
    pub const FRAME_DURATION_SECONDS: &str = "vstyle_frame_duration_seconds";
    pub const COMPLETION_POLLS_TOTAL: &str = "vstyle_completion_polls_total";
}

/// Start the Prometheus exporter listening on `addr`.
pub fn install_exporter(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("Failed to install Prometheus exporter: {}", e)))?;
    info!("Serving metrics on {}", addr);
    Ok(())
}

/// Install the exporter when `METRICS_ADDR` is set.
pub fn install_exporter_from_env() -> WorkerResult<()> {
    match std::env::var("METRICS_ADDR") {
        Ok(addr) if !addr.trim().is_empty() => {
            let addr = addr
                .parse()
                .map_err(|_| WorkerError::config_error(format!("Invalid METRICS_ADDR '{}'", addr)))?;
            install_exporter(addr)
        }
        _ => Ok(()),
    }
}

pub fn record_frame_processed(style: &str, duration_secs: f64) {
    let labels = [("style", style.to_string())];
    counter!(names::FRAMES_PROCESSED_TOTAL, &labels).increment(1);
    histogram!(names::FRAME_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_frame_failed(retryable: bool) {
    let labels = [("retryable", retryable.to_string())];
    counter!(names::FRAMES_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_frame_dead_lettered(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::FRAMES_DEAD_LETTERED_TOTAL, &labels).increment(1);
}

pub fn record_frames_enqueued(count: u64) {
    counter!(names::FRAMES_ENQUEUED_TOTAL).increment(count);
}

pub fn record_completion_poll() {
    counter!(names::COMPLETION_POLLS_TOTAL).increment(1);
}
