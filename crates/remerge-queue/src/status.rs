//! Per-job status records stored as Redis hashes.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use remerge_models::{JobStatus, Stage, StatusRecord, StatusUpdate, JOB_STATUS_TTL_SECS};

use crate::error::{QueueError, QueueResult};

/// Key prefix for status hashes.
pub const STATUS_KEY_PREFIX: &str = "job_status:";

/// Applies the update only when `status` (and optionally `stage`) match.
///
/// KEYS[1] status hash; ARGV[1] expected status; ARGV[2] expected stage or
/// "" to skip the stage check; ARGV[3] ttl seconds; ARGV[4..] field/value pairs.
const COMPARE_AND_SET_LUA: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if current ~= ARGV[1] then
  return 0
end
if ARGV[2] ~= '' then
  local stage = redis.call('HGET', KEYS[1], 'stage')
  if stage ~= ARGV[2] then
    return 0
  end
end
for i = 4, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('EXPIRE', KEYS[1], ARGV[3])
return 1
"#;

/// Status key for a job.
pub fn status_key(job_id: &str) -> String {
    format!("{}{}", STATUS_KEY_PREFIX, job_id)
}

/// Durable per-job status record store.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Merge `update` into the record and refresh its expiry.
    async fn set_fields(&self, job_id: &str, update: &StatusUpdate) -> QueueResult<()>;

    /// Read the record; an absent or expired record is empty.
    async fn get(&self, job_id: &str) -> QueueResult<StatusRecord>;

    /// Apply `update` only if the record is currently at `expected_status`
    /// (and `expected_stage`, when given). Returns whether it was applied.
    async fn compare_and_set(
        &self,
        job_id: &str,
        expected_status: JobStatus,
        expected_stage: Option<Stage>,
        update: &StatusUpdate,
    ) -> QueueResult<bool>;
}

/// Redis-backed status store.
#[derive(Clone)]
pub struct RedisStatusStore {
    client: redis::Client,
    ttl_secs: u64,
    cas: redis::Script,
}

impl RedisStatusStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            ttl_secs: JOB_STATUS_TTL_SECS,
            cas: redis::Script::new(COMPARE_AND_SET_LUA),
        })
    }

    /// Override the record retention window.
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Up to `limit` job ids with a status record, with their current status.
    pub async fn sample(&self, limit: usize) -> QueueResult<Vec<(String, Option<String>)>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", STATUS_KEY_PREFIX);

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 || keys.len() >= limit {
                break;
            }
        }
        keys.truncate(limit);

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let status: Option<String> = conn.hget(&key, "status").await?;
            let job_id = key
                .strip_prefix(STATUS_KEY_PREFIX)
                .unwrap_or(&key)
                .to_string();
            out.push((job_id, status));
        }
        Ok(out)
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn set_fields(&self, job_id: &str, update: &StatusUpdate) -> QueueResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let key = status_key(job_id);

        redis::pipe()
            .atomic()
            .hset_multiple(&key, update.pairs())
            .ignore()
            .expire(&key, self.ttl_secs as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %job_id, fields = update.pairs().len(), "Updated job status");
        Ok(())
    }

    async fn get(&self, job_id: &str) -> QueueResult<StatusRecord> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(status_key(job_id)).await?;
        Ok(StatusRecord::from_fields(fields))
    }

    async fn compare_and_set(
        &self,
        job_id: &str,
        expected_status: JobStatus,
        expected_stage: Option<Stage>,
        update: &StatusUpdate,
    ) -> QueueResult<bool> {
        if update.is_empty() {
            return Err(QueueError::status_store("empty compare-and-set update"));
        }
        let mut conn = self.connection().await?;

        let mut invocation = self.cas.prepare_invoke();
        invocation
            .key(status_key(job_id))
            .arg(expected_status.as_str())
            .arg(expected_stage.map(|s| s.as_str()).unwrap_or_default())
            .arg(self.ttl_secs);
        for (name, value) in update.pairs() {
            invocation.arg(name).arg(value);
        }

        let applied: i64 = invocation.invoke_async(&mut conn).await?;
        debug!(
            job_id = %job_id,
            expected = expected_status.as_str(),
            applied = applied == 1,
            "Compare-and-set job status"
        );
        Ok(applied == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_key_format() {
        assert_eq!(status_key("abc"), "job_status:abc");
    }
}
