//! In-memory queue and status store for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use remerge_models::{JobStatus, Stage, StatusRecord, StatusUpdate};

use crate::error::{QueueError, QueueResult};
use crate::message::{JobMessage, StreamEntry};
use crate::queue::MessageQueue;
use crate::status::StatusStore;

struct Delivery {
    entry: StreamEntry,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StreamEntry>,
    pending: Vec<Delivery>,
    acked: Vec<String>,
    total: u64,
}

/// Single-group queue held in memory.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    seq: AtomicU64,
    notify: Notify,
    fail_enqueue: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent enqueues fail.
    pub fn fail_enqueues(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Append an entry with arbitrary fields, as a foreign producer would.
    pub async fn push_raw(&self, fields: &[(&str, &str)]) -> String {
        let map: HashMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.push(map).await
    }

    async fn push(&self, fields: HashMap<String, String>) -> String {
        let id = format!("{}-0", self.seq.fetch_add(1, Ordering::SeqCst) + 1);
        let entry = StreamEntry::from_fields(id.clone(), &fields);
        {
            let mut state = self.state.lock().await;
            state.ready.push_back(entry);
            state.total += 1;
        }
        self.notify.notify_one();
        id
    }

    /// Ids acknowledged so far, in order.
    pub async fn acked(&self) -> Vec<String> {
        self.state.lock().await.acked.clone()
    }

    /// Entries not yet delivered to any consumer.
    pub async fn ready(&self) -> Vec<StreamEntry> {
        self.state.lock().await.ready.iter().cloned().collect()
    }

    /// Consumer currently holding each pending entry.
    pub async fn pending_owners(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .map(|d| (d.entry.id.clone(), d.consumer.clone()))
            .collect()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn enqueue(&self, message: &JobMessage) -> QueueResult<String> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::enqueue_failed("queue unavailable"));
        }
        let fields = message
            .to_fields()?
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Ok(self.push(fields).await)
    }

    async fn dequeue(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamEntry>> {
        loop {
            {
                let mut state = self.state.lock().await;
                if !state.ready.is_empty() {
                    let take = count.max(1).min(state.ready.len());
                    let batch: Vec<StreamEntry> = state.ready.drain(..take).collect();
                    let now = Instant::now();
                    state.pending.extend(batch.iter().map(|entry| Delivery {
                        entry: entry.clone(),
                        consumer: consumer.to_string(),
                        delivered_at: now,
                    }));
                    return Ok(batch);
                }
            }
            if tokio::time::timeout(block, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<StreamEntry>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut claimed = Vec::new();
        for delivery in state.pending.iter_mut() {
            if claimed.len() >= count.max(1) {
                break;
            }
            if now.duration_since(delivery.delivered_at) >= min_idle {
                delivery.consumer = consumer.to_string();
                delivery.delivered_at = now;
                claimed.push(delivery.entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.pending.retain(|d| d.entry.id != message_id);
        state.acked.push(message_id.to_string());
        Ok(())
    }

    async fn pending_count(&self) -> QueueResult<u64> {
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.state.lock().await.total)
    }
}

/// Status store held in memory, with a log of every applied write.
#[derive(Default)]
pub struct InMemoryStatusStore {
    records: Mutex<HashMap<String, StatusRecord>>,
    history: Mutex<Vec<(String, StatusUpdate)>>,
    fail_writes: AtomicBool,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing the write log.
    pub async fn insert(&self, job_id: &str, update: StatusUpdate) {
        let mut records = self.records.lock().await;
        records.entry(job_id.to_string()).or_default().apply(&update);
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every applied update for `job_id`, oldest first.
    pub async fn history(&self, job_id: &str) -> Vec<StatusUpdate> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, update)| update.clone())
            .collect()
    }

    /// Every applied update across all jobs, oldest first.
    pub async fn history_all(&self) -> Vec<(String, StatusUpdate)> {
        self.history.lock().await.clone()
    }

    /// `(status, stage)` pairs in write order, carrying the last known
    /// status forward for stage-only writes.
    pub async fn transitions(&self, job_id: &str) -> Vec<(Option<JobStatus>, Option<Stage>)> {
        let mut status = None;
        self.history(job_id)
            .await
            .into_iter()
            .map(|u| {
                if let Some(s) = u.status_value() {
                    status = Some(s);
                }
                (status, u.stage_value())
            })
            .collect()
    }

    fn check_writable(&self) -> QueueResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(QueueError::status_store("store unavailable"))
        } else {
            Ok(())
        }
    }

    async fn record(&self, job_id: &str, update: &StatusUpdate) {
        self.records
            .lock()
            .await
            .entry(job_id.to_string())
            .or_default()
            .apply(update);
        self.history
            .lock()
            .await
            .push((job_id.to_string(), update.clone()));
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn set_fields(&self, job_id: &str, update: &StatusUpdate) -> QueueResult<()> {
        self.check_writable()?;
        if !update.is_empty() {
            self.record(job_id, update).await;
        }
        Ok(())
    }

    async fn get(&self, job_id: &str) -> QueueResult<StatusRecord> {
        Ok(self
            .records
            .lock()
            .await
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn compare_and_set(
        &self,
        job_id: &str,
        expected_status: JobStatus,
        expected_stage: Option<Stage>,
        update: &StatusUpdate,
    ) -> QueueResult<bool> {
        self.check_writable()?;
        // Hold the record lock across check and write.
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(job_id) else {
            return Ok(false);
        };
        let matches = record.status() == Some(expected_status)
            && expected_stage.map_or(true, |stage| record.stage() == Some(stage));
        if !matches {
            return Ok(false);
        }
        record.apply(update);
        drop(records);

        self.history
            .lock()
            .await
            .push((job_id.to_string(), update.clone()));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{JobType, NewJobData};

    #[tokio::test]
    async fn test_queue_delivers_then_tracks_pending() {
        let queue = InMemoryQueue::new();
        let id = queue
            .enqueue(&JobMessage::New(NewJobData::default()))
            .await
            .unwrap();

        let batch = queue
            .dequeue("c1", Duration::from_millis(10), 1)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].job_type, JobType::New);
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        queue.ack(&id).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert_eq!(queue.acked().await, vec![id]);
    }

    #[tokio::test]
    async fn test_empty_dequeue_times_out() {
        let queue = InMemoryQueue::new();
        let batch = queue
            .dequeue("c1", Duration::from_millis(5), 1)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_stale_entry_claimed_by_another_consumer() {
        let queue = InMemoryQueue::new();
        let id = queue.push_raw(&[("job_data", "{}")]).await;
        queue
            .dequeue("c1", Duration::from_millis(5), 1)
            .await
            .unwrap();

        // Not idle long enough yet.
        let none = queue
            .claim_stale("c2", Duration::from_secs(60), 1)
            .await
            .unwrap();
        assert!(none.is_empty());

        let again = queue.claim_stale("c2", Duration::ZERO, 1).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].job_type, JobType::Unknown(None));
        assert_eq!(queue.pending_owners().await, vec![(id.clone(), "c2".to_string())]);

        queue.ack(&id).await.unwrap();
        assert!(queue
            .claim_stale("c3", Duration::ZERO, 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_set_only_once() {
        let store = InMemoryStatusStore::new();
        store
            .insert(
                "j",
                StatusUpdate::transition(JobStatus::PendingReview, Stage::ScriptReadyForReview),
            )
            .await;

        let claim = StatusUpdate::transition(JobStatus::Processing, Stage::ContinuationTriggered);
        assert!(store
            .compare_and_set("j", JobStatus::PendingReview, None, &claim)
            .await
            .unwrap());
        assert!(!store
            .compare_and_set("j", JobStatus::PendingReview, None, &claim)
            .await
            .unwrap());

        let record = store.get("j").await.unwrap();
        assert_eq!(record.stage(), Some(Stage::ContinuationTriggered));
    }

    #[tokio::test]
    async fn test_compare_and_set_checks_stage() {
        let store = InMemoryStatusStore::new();
        store
            .insert(
                "j",
                StatusUpdate::transition(JobStatus::Processing, Stage::LipSyncing),
            )
            .await;

        let claim = StatusUpdate::stage_only(Stage::ChargingCredits);
        assert!(!store
            .compare_and_set(
                "j",
                JobStatus::Processing,
                Some(Stage::ContinuationTriggered),
                &claim
            )
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_record_reads_empty() {
        let store = InMemoryStatusStore::new();
        assert!(store.get("nope").await.unwrap().is_empty());
    }
}
