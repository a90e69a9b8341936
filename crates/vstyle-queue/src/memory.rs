//! In-process queue with the same lock/visibility semantics as the Redis queue.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;
use vstyle_models::FrameJob;

use crate::clock::{add_duration, Clock, SystemClock};
use crate::error::{QueueError, QueueResult};
use crate::lease::{FrameQueue, Lease, LeaseOutcome};

#[derive(Debug, Clone)]
enum Delivery {
    Available,
    Locked { until: DateTime<Utc>, token: String },
}

#[derive(Debug, Clone)]
struct Message {
    payload: String,
    delivery: Delivery,
    deliveries: u32,
}

/// A dead-lettered message.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: String,
    pub payload: String,
    pub reason: String,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    messages: BTreeMap<u64, Message>,
    dead: Vec<DeadLetter>,
    batches: Vec<usize>,
}

/// In-memory queue. Clones share the same messages.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
    max_deliveries: u32,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self::with_clock(visibility_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(visibility_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            clock,
            visibility_timeout,
            max_deliveries: 5,
        }
    }

    /// Set the delivery bound.
    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish a raw body, bypassing serialization.
    pub fn push_raw(&self, payload: impl Into<String>) -> String {
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.messages.insert(
                id,
                Message {
                    payload: payload.into(),
                    delivery: Delivery::Available,
                    deliveries: 0,
                },
            );
            id
        };
        self.notify.notify_waiters();
        id.to_string()
    }

    /// Size of every `send_batch` call so far.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batches.clone()
    }

    /// Dead-lettered messages.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead.clone()
    }

    /// Messages that can be leased right now.
    pub fn available(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .messages
            .values()
            .filter(|m| is_leasable(m, now))
            .count()
    }

    /// Payloads of every message not yet deleted, in publish order.
    pub fn payloads(&self) -> Vec<String> {
        self.lock().messages.values().map(|m| m.payload.clone()).collect()
    }

    fn try_lease(&self) -> Option<Lease> {
        let now = self.clock.now();
        let mut state = self.lock();

        let (id, message) = state
            .messages
            .iter_mut()
            .find(|(_, m)| is_leasable(m, now))?;

        if let Delivery::Locked { token, .. } = &message.delivery {
            debug!("Lease {} on message {} expired, redelivering", token, id);
        }

        let token = Uuid::new_v4().to_string();
        let locked_until = add_duration(now, self.visibility_timeout);
        message.delivery = Delivery::Locked {
            until: locked_until,
            token: token.clone(),
        };
        message.deliveries += 1;

        Some(Lease {
            message_id: id.to_string(),
            token,
            payload: message.payload.clone(),
            delivery_count: message.deliveries,
            locked_until,
        })
    }

    /// Run `f` on the message if `lease` still owns it.
    fn with_owned<T>(
        &self,
        lease: &Lease,
        f: impl FnOnce(&mut State, u64) -> T,
    ) -> QueueResult<T> {
        let now = self.clock.now();
        let id: u64 = lease
            .message_id
            .parse()
            .map_err(|_| QueueError::LeaseLost(lease.message_id.clone()))?;

        let mut state = self.lock();
        let owned = match state.messages.get(&id).map(|m| &m.delivery) {
            Some(Delivery::Locked { until, token }) => *token == lease.token && *until > now,
            _ => false,
        };

        if !owned {
            return Err(QueueError::LeaseLost(lease.message_id.clone()));
        }

        Ok(f(&mut state, id))
    }
}

fn is_leasable(message: &Message, now: DateTime<Utc>) -> bool {
    match &message.delivery {
        Delivery::Available => true,
        Delivery::Locked { until, .. } => *until <= now,
    }
}

#[async_trait]
impl FrameQueue for MemoryQueue {
    async fn send_batch(&self, jobs: &[FrameJob]) -> QueueResult<usize> {
        let payloads = jobs
            .iter()
            .map(|job| job.to_json().map_err(|e| QueueError::enqueue_failed(e.to_string())))
            .collect::<QueueResult<Vec<_>>>()?;

        {
            let mut state = self.lock();
            for payload in payloads {
                let id = state.next_id;
                state.next_id += 1;
                state.messages.insert(
                    id,
                    Message {
                        payload,
                        delivery: Delivery::Available,
                        deliveries: 0,
                    },
                );
            }
            state.batches.push(jobs.len());
        }

        self.notify.notify_waiters();
        Ok(jobs.len())
    }

    async fn lease(&self, wait: Duration) -> QueueResult<LeaseOutcome> {
        let deadline = add_duration(self.clock.now(), wait);

        loop {
            let notified = self.notify.notified();

            if let Some(lease) = self.try_lease() {
                return Ok(LeaseOutcome::Leased(lease));
            }

            let now = self.clock.now();
            if now >= deadline {
                return Ok(LeaseOutcome::Empty);
            }

            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                biased;
                _ = notified => {}
                _ = self.clock.sleep(remaining) => {}
            }
        }
    }

    async fn renew(&self, lease: &Lease) -> QueueResult<()> {
        let until = add_duration(self.clock.now(), self.visibility_timeout);
        self.with_owned(lease, |state, id| {
            if let Some(message) = state.messages.get_mut(&id) {
                message.delivery = Delivery::Locked {
                    until,
                    token: lease.token.clone(),
                };
            }
        })
    }

    async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        self.with_owned(lease, |state, id| {
            state.messages.remove(&id);
        })
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> QueueResult<()> {
        self.with_owned(lease, |state, id| {
            if let Some(message) = state.messages.remove(&id) {
                state.dead.push(DeadLetter {
                    message_id: id.to_string(),
                    payload: message.payload,
                    reason: reason.to_string(),
                });
            }
        })?;
        warn!("Moved message {} to dead-letter queue: {}", lease.message_id, reason);
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.lock().messages.len() as u64)
    }

    fn max_deliveries(&self) -> u32 {
        self.max_deliveries
    }
}
