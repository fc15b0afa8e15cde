//! Job executor: the stream polling loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use remerge_queue::{JobType, MessageQueue, StreamEntry};

use crate::config::WorkerConfig;
use crate::deps::PipelineDeps;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::{run_continue_job, run_new_job, JobOutcome};
use crate::retry::FailureTracker;

/// Pulls one message at a time, runs its phase, and acknowledges it.
///
/// Every message is acknowledged once its handler returns. A pipeline
/// failure is a terminal job outcome recorded in the status store, so the
/// entry is never redelivered for it. Only queue transport errors make the
/// loop back off and read again.
///
/// Before each new read the executor takes over entries another consumer
/// left unacknowledged for longer than `claim_min_idle`. That covers a
/// worker that crashed mid-job and a read cut short by shutdown after the
/// server had already assigned an entry.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn MessageQueue>,
    deps: Arc<PipelineDeps>,
    consumer_name: String,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn MessageQueue>, deps: PipelineDeps) -> Self {
        let (shutdown, _) = watch::channel(false);
        let consumer_name = config
            .consumer_name
            .clone()
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));
        Self {
            config,
            queue,
            deps: Arc::new(deps),
            consumer_name,
            shutdown,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until [`JobExecutor::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(consumer = %self.consumer_name, "Starting job executor");
        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(self.config.max_logged_failures);

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown requested, stopping executor");
                break;
            }

            // Only the blocking read is raced against shutdown; a message
            // already read is always handled and acknowledged.
            let read = tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                    continue;
                }
                result = self.read() => result,
            };

            match read {
                Ok(entries) => {
                    failures.record_success();
                    self.process(entries).await;
                }
                Err(e) => {
                    let backoff = match &e {
                        WorkerError::Queue(q) if q.is_transport() => self.config.transport_backoff,
                        _ => self.config.error_backoff,
                    };
                    if failures.record_failure() {
                        error!(
                            consecutive = failures.failure_count(),
                            backoff_secs = backoff.as_secs(),
                            "Error reading job stream: {}",
                            e
                        );
                    }
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal the run loop to stop after the current message.
    pub fn shutdown(&self) {
        // Stored even when `run` has not subscribed yet.
        self.shutdown.send_replace(true);
    }

    /// One blocking read and the handling of whatever it returned.
    /// Returns the number of entries handled.
    pub async fn poll_once(&self) -> WorkerResult<usize> {
        let entries = self.read().await?;
        let handled = entries.len();
        self.process(entries).await;
        Ok(handled)
    }

    async fn read(&self) -> WorkerResult<Vec<StreamEntry>> {
        let stale = self
            .queue
            .claim_stale(
                &self.consumer_name,
                self.config.claim_min_idle,
                self.config.read_count,
            )
            .await?;
        if !stale.is_empty() {
            warn!(
                consumer = %self.consumer_name,
                count = stale.len(),
                "Resuming entries left unacknowledged by another consumer"
            );
            metrics::record_reclaimed_messages(stale.len());
            return Ok(stale);
        }

        let entries = self
            .queue
            .dequeue(
                &self.consumer_name,
                self.config.block_timeout,
                self.config.read_count,
            )
            .await?;

        if entries.is_empty() {
            match self.queue.pending_count().await {
                Ok(pending) => debug!(pending, "No new messages"),
                Err(e) => debug!("No new messages; pending count unavailable: {}", e),
            }
        }
        Ok(entries)
    }

    async fn process(&self, entries: Vec<StreamEntry>) {
        for entry in entries {
            self.handle(&entry).await;
            if let Err(e) = self.queue.ack(&entry.id).await {
                error!(message_id = %entry.id, "Failed to acknowledge message: {}", e);
            }
        }
    }

    async fn handle(&self, entry: &StreamEntry) -> Option<JobOutcome> {
        if entry.job_data.is_none() {
            warn!(message_id = %entry.id, "Message has no job_data, skipping");
            metrics::record_malformed_message();
            return None;
        }

        let outcome = match entry.job_type.resolve(&entry.id) {
            JobType::Continue => match entry.decode_continue() {
                Ok(data) => run_continue_job(&self.deps, &entry.id, data).await,
                Err(e) => return malformed(entry, e),
            },
            _ => match entry.decode_new() {
                Ok(data) => run_new_job(&self.deps, &entry.id, data).await,
                Err(e) => return malformed(entry, e),
            },
        };

        debug!(message_id = %entry.id, outcome = ?outcome, "Message handled");
        Some(outcome)
    }
}

fn malformed(entry: &StreamEntry, err: remerge_queue::QueueError) -> Option<JobOutcome> {
    warn!(message_id = %entry.id, "Could not decode job_data, skipping: {}", err);
    metrics::record_malformed_message();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use remerge_models::{JobStatus, Stage};
    use remerge_queue::memory::InMemoryQueue;
    use remerge_queue::{ContinueJobData, JobMessage, NewJobData};

    use crate::pipeline::fakes::Harness;

    fn executor(queue: Arc<InMemoryQueue>, harness: &Harness) -> JobExecutor {
        let config = WorkerConfig {
            block_timeout: Duration::from_millis(20),
            ..WorkerConfig::default()
        };
        JobExecutor::new(config, queue, harness.deps.clone())
    }

    fn new_message(job_id: &str) -> JobMessage {
        JobMessage::New(NewJobData {
            job_id: Some(job_id.to_string()),
            user_id: Some("u1".to_string()),
            avatar_s3_key: Some("uploads/avatars/u1/a.png".to_string()),
            video_s3_key: None,
            manual_script_mode: false,
        })
    }

    #[tokio::test]
    async fn test_new_message_runs_phase_one_and_acks() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        let id = queue.enqueue(&new_message("j1")).await.unwrap();

        let exec = executor(queue.clone(), &harness);
        assert_eq!(exec.poll_once().await.unwrap(), 1);

        assert_eq!(queue.acked().await, vec![id]);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert_eq!(
            harness.record("j1").await.status(),
            Some(JobStatus::PendingReview)
        );
    }

    #[tokio::test]
    async fn test_failed_job_is_still_acked() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        harness.moderator.fail_calls(true);
        let id = queue.enqueue(&new_message("j2")).await.unwrap();

        executor(queue.clone(), &harness).poll_once().await.unwrap();

        assert_eq!(queue.acked().await, vec![id]);
        assert_eq!(harness.record("j2").await.status(), Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_missing_job_data_is_acked_without_status() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        let id = queue.push_raw(&[("job_type", "new")]).await;

        executor(queue.clone(), &harness).poll_once().await.unwrap();

        assert_eq!(queue.acked().await, vec![id]);
    }

    #[tokio::test]
    async fn test_undecodable_job_data_is_acked() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        let id = queue
            .push_raw(&[("job_type", "continue"), ("job_data", "{not json")])
            .await;

        executor(queue.clone(), &harness).poll_once().await.unwrap();

        assert_eq!(queue.acked().await, vec![id]);
        assert!(harness.synthesizer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_message_without_type_runs_as_new() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        queue
            .push_raw(&[(
                "job_data",
                r#"{"job_id":"j3","user_id":"u1","avatar_s3_key":"uploads/avatars/u1/a.png"}"#,
            )])
            .await;

        executor(queue.clone(), &harness).poll_once().await.unwrap();

        assert_eq!(
            harness.record("j3").await.status(),
            Some(JobStatus::PendingReview)
        );
    }

    #[tokio::test]
    async fn test_continue_message_runs_phase_two() {
        let harness = Harness::new().await;
        harness.seed_triggered("j4", "u1", None).await;
        let queue = Arc::new(InMemoryQueue::new());
        queue
            .enqueue(&JobMessage::Continue(ContinueJobData {
                job_id: Some("j4".to_string()),
                user_id: Some("u1".to_string()),
                script: Some("Final words".to_string()),
                voice_id: None,
            }))
            .await
            .unwrap();

        executor(queue.clone(), &harness).poll_once().await.unwrap();

        let record = harness.record("j4").await;
        assert_eq!(record.status(), Some(JobStatus::Completed));
        assert_eq!(record.stage(), Some(Stage::Done));
    }

    #[tokio::test]
    async fn test_empty_poll_returns_zero() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());

        assert_eq!(executor(queue, &harness).poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entry_of_crashed_consumer_is_resumed() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        let id = queue.enqueue(&new_message("j5")).await.unwrap();

        // A consumer that read the entry and died before acknowledging.
        queue
            .dequeue("dead-worker", Duration::from_millis(10), 1)
            .await
            .unwrap();

        let exec = JobExecutor::new(
            WorkerConfig {
                block_timeout: Duration::from_millis(20),
                claim_min_idle: Duration::ZERO,
                consumer_name: Some("worker-b".to_string()),
                ..WorkerConfig::default()
            },
            queue.clone(),
            harness.deps.clone(),
        );
        assert_eq!(exec.consumer_name(), "worker-b");
        assert_eq!(exec.poll_once().await.unwrap(), 1);

        assert_eq!(queue.acked().await, vec![id]);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert_eq!(
            harness.record("j5").await.status(),
            Some(JobStatus::PendingReview)
        );
        assert_eq!(harness.writer.generated(), 0);
        assert!(harness.catalog.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_recently_read_entry_is_left_to_its_consumer() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        queue.enqueue(&new_message("j6")).await.unwrap();
        queue
            .dequeue("busy-worker", Duration::from_millis(10), 1)
            .await
            .unwrap();

        // Default idle threshold is far longer than this test.
        assert_eq!(executor(queue.clone(), &harness).poll_once().await.unwrap(), 0);
        assert!(queue.acked().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_run_is_honored() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        let exec = executor(queue, &harness);

        exec.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), exec.run())
            .await
            .expect("executor did not stop");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let harness = Harness::new().await;
        let queue = Arc::new(InMemoryQueue::new());
        let exec = Arc::new(executor(queue, &harness));

        let runner = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.run().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        exec.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("executor did not stop");
        assert!(result.unwrap().is_ok());
    }
}
