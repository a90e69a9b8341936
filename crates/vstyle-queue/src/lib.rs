//! Frame job queue with lease-based message visibility.
//!
//! This crate provides:
//! - The `FrameQueue` trait: batched publish, lease, renew, ack, dead-letter
//! - A Redis Streams consumer-group implementation
//! - An in-memory implementation driven by an injectable clock
//! - The `Clock` abstraction shared by every polling loop

pub mod clock;
pub mod error;
pub mod lease;
pub mod memory;
pub mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, QueueResult};
pub use lease::{FrameQueue, Lease, LeaseOutcome};
pub use memory::MemoryQueue;
pub use queue::{QueueConfig, RedisFrameQueue};
