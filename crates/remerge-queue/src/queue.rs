//! Job queue using Redis Streams.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{
    StreamAutoClaimReply, StreamId, StreamInfoGroupsReply, StreamPendingReply, StreamRangeReply,
    StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::{JobMessage, StreamEntry};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "meme_jobs".to_string(),
            consumer_group: "meme_job_consumers".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
        }
    }
}

/// Durable, consumer-group based message queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Create the consumer group if it does not exist yet.
    async fn init(&self) -> QueueResult<()>;

    /// Append a message and return its stream id.
    async fn enqueue(&self, message: &JobMessage) -> QueueResult<String>;

    /// Block for up to `block` waiting for unclaimed entries.
    async fn dequeue(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamEntry>>;

    /// Take over entries another consumer read but has not acknowledged for
    /// at least `min_idle`, such as those of a crashed worker.
    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamEntry>>;

    /// Remove an entry from the group's pending list.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Entries delivered to a consumer but not yet acknowledged.
    async fn pending_count(&self) -> QueueResult<u64>;

    /// Total entries in the stream.
    async fn len(&self) -> QueueResult<u64>;
}

/// Consumer group summary from `XINFO GROUPS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: usize,
    pub pending: usize,
    pub last_delivered_id: String,
}

/// Snapshot of the stream used by the self-check tool.
#[derive(Debug, Clone, Default)]
pub struct QueueDiagnostics {
    pub stream_len: u64,
    pub groups: Vec<GroupInfo>,
    /// Most recent entries, newest first.
    pub recent: Vec<StreamEntry>,
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Stream length, consumer groups and the last `recent` entries.
    pub async fn diagnostics(&self, recent: usize) -> QueueResult<QueueDiagnostics> {
        let mut conn = self.connection().await?;
        let stream = &self.config.stream_name;

        let stream_len: u64 = conn.xlen(stream).await?;
        if stream_len == 0 {
            return Ok(QueueDiagnostics::default());
        }

        let info: StreamInfoGroupsReply = conn.xinfo_groups(stream).await?;
        let groups = info
            .groups
            .into_iter()
            .map(|g| GroupInfo {
                name: g.name,
                consumers: g.consumers,
                pending: g.pending,
                last_delivered_id: g.last_delivered_id,
            })
            .collect();

        let range: StreamRangeReply = conn.xrevrange_count(stream, "+", "-", recent).await?;
        let recent = range.ids.iter().map(to_entry).collect();

        Ok(QueueDiagnostics {
            stream_len,
            groups,
            recent,
        })
    }
}

#[async_trait]
impl MessageQueue for JobQueue {
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Concurrent workers race to create the group; BUSYGROUP means one won.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn enqueue(&self, message: &JobMessage) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let fields = message.to_fields()?;

        let message_id: String = conn
            .xadd(&self.config.stream_name, "*", fields.as_slice())
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(
            job_id = message.job_id().unwrap_or_default(),
            job_type = message.job_type().as_wire().unwrap_or_default(),
            "Enqueued job with message ID {}",
            message_id
        );

        Ok(message_id)
    }

    async fn dequeue(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamEntry>> {
        let mut conn = self.connection().await?;

        // A timed-out block returns nil rather than an empty reply.
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries: Vec<StreamEntry> = reply
            .map(|r| {
                r.keys
                    .iter()
                    .flat_map(|key| key.ids.iter().map(to_entry))
                    .collect()
            })
            .unwrap_or_default();

        if !entries.is_empty() {
            debug!("Consumed {} entries from {}", entries.len(), self.config.stream_name);
        }
        Ok(entries)
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamEntry>> {
        let mut conn = self.connection().await?;

        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        // Trimmed entries come back as deleted ids; they can only be acked.
        for id in &reply.deleted_ids {
            warn!(message_id = %id, "Pending entry no longer in stream, acknowledging");
            let _: u64 = conn
                .xack(&self.config.stream_name, &self.config.consumer_group, &[id])
                .await?;
        }

        let entries: Vec<StreamEntry> = reply.claimed.iter().map(to_entry).collect();
        if !entries.is_empty() {
            info!(
                consumer = %consumer,
                "Claimed {} stale entries from {}",
                entries.len(),
                self.config.stream_name
            );
        }
        Ok(entries)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let _: u64 = conn
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[message_id],
            )
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    async fn pending_count(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let pending: StreamPendingReply = conn
            .xpending(&self.config.stream_name, &self.config.consumer_group)
            .await?;
        Ok(pending.count() as u64)
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }
}

/// Decode a raw stream id into text fields. Non-text values are skipped.
fn to_entry(raw: &StreamId) -> StreamEntry {
    let fields: HashMap<String, String> = raw
        .map
        .iter()
        .filter_map(|(k, v)| {
            redis::from_redis_value::<String>(v)
                .ok()
                .map(|text| (k.clone(), text))
        })
        .collect();
    StreamEntry::from_fields(raw.id.clone(), &fields)
}
