//! Frame queue using Redis Streams.
//!
//! Each frame job is one stream entry. Workers read through a consumer group;
//! a delivered entry stays in the group's pending list until it is acked.
//! Entries whose holder has been idle for longer than the visibility timeout
//! are claimed by the next worker that asks for a lease.
//!
//! Renew, ack and dead-letter run as Lua scripts that first check the entry is
//! still pending for this consumer. Unlike [`crate::MemoryQueue`], an entry whose
//! visibility timeout has passed can still be acked by its holder until another
//! consumer claims it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vstyle_models::FrameJob;

use crate::clock::add_duration;
use crate::error::{QueueError, QueueResult};
use crate::lease::{FrameQueue, Lease, LeaseOutcome};

/// Resets idle time on an entry still pending for ARGV[3].
const RENEW_SCRIPT: &str = r#"
local pending = redis.call('XPENDING', KEYS[1], ARGV[1], ARGV[2], ARGV[2], 1)
if #pending == 0 or pending[1][2] ~= ARGV[3] then
    return 0
end
local claimed = redis.call('XCLAIM', KEYS[1], ARGV[1], ARGV[3], 0, ARGV[2], 'JUSTID')
return #claimed
"#;

/// Acks and deletes an entry still pending for ARGV[3].
const ACK_SCRIPT: &str = r#"
local pending = redis.call('XPENDING', KEYS[1], ARGV[1], ARGV[2], ARGV[2], 1)
if #pending == 0 or pending[1][2] ~= ARGV[3] then
    return 0
end
local acked = redis.call('XACK', KEYS[1], ARGV[1], ARGV[2])
redis.call('XDEL', KEYS[1], ARGV[2])
return acked
"#;

/// Copies an entry still pending for ARGV[3] to the DLQ stream, then acks it.
const DEAD_LETTER_SCRIPT: &str = r#"
local pending = redis.call('XPENDING', KEYS[1], ARGV[1], ARGV[2], ARGV[2], 1)
if #pending == 0 or pending[1][2] ~= ARGV[3] then
    return 0
end
redis.call('XADD', KEYS[2], '*', 'job', ARGV[4], 'error', ARGV[5], 'original_id', ARGV[2], 'deliveries', ARGV[6])
local acked = redis.call('XACK', KEYS[1], ARGV[1], ARGV[2])
redis.call('XDEL', KEYS[1], ARGV[2])
return acked
"#;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix shared by every stream of this deployment
    pub namespace: String,
    /// Queue name within the namespace
    pub name: String,
    /// How long a lease hides a message from other consumers
    pub visibility_timeout: Duration,
    /// Deliveries before a message is dead-lettered
    pub max_deliveries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            namespace: "vstyle".to_string(),
            name: "frames".to_string(),
            visibility_timeout: Duration::from_secs(300),
            max_deliveries: 5,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            namespace: std::env::var("QUEUE_NAMESPACE").unwrap_or_else(|_| "vstyle".to_string()),
            name: std::env::var("QUEUE_NAME").unwrap_or_else(|_| "frames".to_string()),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }

    /// Stream holding the jobs.
    pub fn stream_name(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }

    /// Consumer group shared by all workers.
    pub fn consumer_group(&self) -> String {
        format!("{}:{}:workers", self.namespace, self.name)
    }

    /// Dead letter stream.
    pub fn dlq_stream_name(&self) -> String {
        format!("{}:{}:dlq", self.namespace, self.name)
    }
}

/// Redis Streams frame queue.
///
/// Each instance is one consumer in the group.
pub struct RedisFrameQueue {
    client: redis::Client,
    config: QueueConfig,
    stream: String,
    group: String,
    dlq: String,
    consumer: String,
}

impl RedisFrameQueue {
    /// Create a new queue client.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self {
            client,
            stream: config.stream_name(),
            group: config.consumer_group(),
            dlq: config.dlq_stream_name(),
            consumer: format!("worker-{}", Uuid::new_v4()),
            config,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Consumer name of this instance.
    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create stream and consumer group if missing).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Group starts at "0" so jobs published before any worker started are delivered.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.dlq).await?;
        Ok(len)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn visibility_ms(&self) -> u64 {
        self.config.visibility_timeout.as_millis() as u64
    }

    fn lease_for(&self, entry: &StreamId, delivery_count: u32) -> Lease {
        let payload = match entry.map.get("job") {
            Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            _ => String::new(),
        };

        Lease {
            message_id: entry.id.clone(),
            token: self.consumer.clone(),
            payload,
            delivery_count,
            locked_until: add_duration(Utc::now(), self.config.visibility_timeout),
        }
    }

    /// Claim one entry whose holder let its visibility window lapse.
    async fn reclaim_expired(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> QueueResult<Option<Lease>> {
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.visibility_ms())
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut *conn)
            .await?;

        let Some(candidate) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        // XCLAIM re-checks the idle time, so a concurrent claim by another worker yields nothing.
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.visibility_ms())
            .arg(&candidate.id)
            .query_async(&mut *conn)
            .await?;

        let Some(entry) = claimed.ids.first() else {
            return Ok(None);
        };

        let delivery_count = u32::try_from(candidate.times_delivered)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        info!(
            "Reclaimed message {} from {} (delivery {})",
            entry.id, candidate.consumer, delivery_count
        );

        Ok(Some(self.lease_for(entry, delivery_count)))
    }

    async fn read_new(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        wait: Duration,
    ) -> QueueResult<Option<Lease>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1);

        // BLOCK 0 would block forever.
        let block_ms = wait.as_millis() as u64;
        if block_ms > 0 {
            cmd.arg("BLOCK").arg(block_ms);
        }

        let reply: Option<StreamReadReply> = cmd
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut *conn)
            .await?;

        let entry = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next();

        Ok(entry.map(|e| {
            debug!("Leased message {}", e.id);
            self.lease_for(&e, 1)
        }))
    }
}

#[async_trait]
impl FrameQueue for RedisFrameQueue {
    async fn send_batch(&self, jobs: &[FrameJob]) -> QueueResult<usize> {
        if jobs.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();

        for job in jobs {
            let payload = job.to_json().map_err(|e| QueueError::enqueue_failed(e.to_string()))?;
            pipe.cmd("XADD")
                .arg(&self.stream)
                .arg("*")
                .arg("job")
                .arg(payload)
                .arg("key")
                .arg(job.idempotency_key());
        }

        let ids: Vec<String> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        debug!("Published batch of {} messages to {}", ids.len(), self.stream);
        Ok(ids.len())
    }

    async fn lease(&self, wait: Duration) -> QueueResult<LeaseOutcome> {
        let mut conn = self.connection().await?;

        if let Some(lease) = self.reclaim_expired(&mut conn).await? {
            return Ok(LeaseOutcome::Leased(lease));
        }

        match self.read_new(&mut conn, wait).await? {
            Some(lease) => Ok(LeaseOutcome::Leased(lease)),
            None => Ok(LeaseOutcome::Empty),
        }
    }

    async fn renew(&self, lease: &Lease) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // XCLAIM JUSTID resets idle time without counting a delivery.
        let renewed: u64 = Script::new(RENEW_SCRIPT)
            .key(&self.stream)
            .arg(&self.group)
            .arg(&lease.message_id)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;

        if renewed == 0 {
            return Err(QueueError::LeaseLost(lease.message_id.clone()));
        }

        debug!("Renewed lease on {}", lease.message_id);
        Ok(())
    }

    async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let acked: u64 = Script::new(ACK_SCRIPT)
            .key(&self.stream)
            .arg(&self.group)
            .arg(&lease.message_id)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;

        if acked == 0 {
            return Err(QueueError::LeaseLost(lease.message_id.clone()));
        }

        debug!("Acknowledged message: {}", lease.message_id);
        Ok(())
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let moved: u64 = Script::new(DEAD_LETTER_SCRIPT)
            .key(&self.stream)
            .key(&self.dlq)
            .arg(&self.group)
            .arg(&lease.message_id)
            .arg(&lease.token)
            .arg(&lease.payload)
            .arg(reason)
            .arg(lease.delivery_count)
            .invoke_async(&mut conn)
            .await?;

        if moved == 0 {
            return Err(QueueError::LeaseLost(lease.message_id.clone()));
        }

        warn!("Moved message {} to DLQ: {}", lease.message_id, reason);
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.stream).await?;
        Ok(len)
    }

    fn max_deliveries(&self) -> u32 {
        self.config.max_deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names_follow_namespace() {
        let config = QueueConfig {
            namespace: "test".to_string(),
            name: "frames".to_string(),
            ..Default::default()
        };

        assert_eq!(config.stream_name(), "test:frames");
        assert_eq!(config.consumer_group(), "test:frames:workers");
        assert_eq!(config.dlq_stream_name(), "test:frames:dlq");
    }

    #[test]
    fn test_consumers_get_distinct_names() {
        let a = RedisFrameQueue::new(QueueConfig::default()).unwrap();
        let b = RedisFrameQueue::new(QueueConfig::default()).unwrap();
        assert_ne!(a.consumer_name(), b.consumer_name());
        assert!(a.consumer_name().starts_with("worker-"));
    }
}
