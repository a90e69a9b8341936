//! Leases and the queue trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vstyle_models::FrameJob;

use crate::error::{QueueError, QueueResult};

/// A message held by one worker.
///
/// While the lease is valid no other consumer can receive the message. If it
/// is neither renewed nor acknowledged before `locked_until`, the message
/// becomes available again.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Queue message ID
    pub message_id: String,
    /// Owner token (consumer name)
    pub token: String,
    /// Raw message body
    pub payload: String,
    /// How many times the message has been delivered, this delivery included
    pub delivery_count: u32,
    /// End of the visibility window
    pub locked_until: DateTime<Utc>,
}

impl Lease {
    /// Deserialize the frame job carried by this message.
    pub fn frame_job(&self) -> QueueResult<FrameJob> {
        FrameJob::from_json(&self.payload).map_err(|e| QueueError::Malformed {
            message_id: self.message_id.clone(),
            reason: e.to_string(),
        })
    }

    /// Whether this is a redelivery.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Result of a lease attempt that reached the queue.
///
/// Transport failures are reported as `Err`, never as `Empty`.
#[derive(Debug, Clone)]
pub enum LeaseOutcome {
    Leased(Lease),
    /// Nothing became available within the wait
    Empty,
}

/// Queue of frame jobs with lock-based visibility.
#[async_trait]
pub trait FrameQueue: Send + Sync {
    /// Publish a batch of jobs in one call. Returns the number published.
    async fn send_batch(&self, jobs: &[FrameJob]) -> QueueResult<usize>;

    /// Lease one message, waiting up to `wait` for one to become available.
    async fn lease(&self, wait: Duration) -> QueueResult<LeaseOutcome>;

    /// Extend the visibility window of a held lease.
    async fn renew(&self, lease: &Lease) -> QueueResult<()>;

    /// Delete the message. The only operation that removes a job for good.
    ///
    /// Fails with `LeaseLost` once another consumer holds the message.
    /// `MemoryQueue` also rejects a lease whose window has passed, while the
    /// Redis queue accepts it until the entry is actually reclaimed.
    async fn ack(&self, lease: &Lease) -> QueueResult<()>;

    /// Move the message to the dead-letter queue and delete it.
    async fn dead_letter(&self, lease: &Lease, reason: &str) -> QueueResult<()>;

    /// Messages not yet deleted (available or leased).
    async fn len(&self) -> QueueResult<u64>;

    /// Deliveries after which a message is dead-lettered instead of processed.
    fn max_deliveries(&self) -> u32;
}
