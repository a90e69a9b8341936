//! Video-level stages of the stylization pipeline.
//!
//! - [`Splitter`]: source video to numbered frames plus audio
//! - [`Enqueuer`]: one frame job per frame, in batches, with an optional cap
//! - [`CompletionMonitor`]: waits until every submitted frame has an output
//! - [`Assembler`]: transformed frames plus audio back into a video
//! - [`Pipeline`]: all of the above for one video, with reconciliation

pub mod assembler;
pub mod config;
pub mod enqueuer;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod splitter;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{AssembleOutput, Assembler};
pub use config::{PipelineConfig, DEFAULT_BATCH_SIZE};
pub use enqueuer::{EnqueueReport, Enqueuer};
pub use error::{PipelineError, PipelineResult};
pub use monitor::{CompletionMonitor, MonitorOutcome};
pub use pipeline::{Pipeline, PipelineReport, StageTimings};
pub use splitter::{SplitOutput, Splitter};
