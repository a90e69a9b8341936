//! Frame stylization worker.
//!
//! This crate provides:
//! - The worker loop: lease, transform, upload, ack
//! - Frame processing with per-frame log capture
//! - Retry and failure tracking for transient queue/store errors
//! - Tracing setup and Prometheus metrics shared by the binaries

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod retry;

pub use config::{env_flag, TransformerConfig, TransformerKind, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{FrameWorker, WorkerStats};
pub use logging::{init_tracing, JobLogger};
pub use processor::{FrameOutcome, FrameProcessor};
pub use retry::{retry_async, FailureTracker, RetryConfig, RetryResult};
