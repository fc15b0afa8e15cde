//! Redis queue and status store integration tests.

use std::time::Duration;

use remerge_models::{fields, JobStatus, Stage, StatusUpdate};
use remerge_queue::{
    ContinueJobData, JobMessage, JobQueue, JobType, MessageQueue, NewJobData, QueueConfig,
    RedisStatusStore, StatusStore,
};

fn redis_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Queue on a throwaway stream so tests do not see each other's entries.
fn scratch_queue() -> JobQueue {
    let suffix = uuid::Uuid::new_v4();
    JobQueue::new(QueueConfig {
        redis_url: redis_url(),
        stream_name: format!("test_meme_jobs:{}", suffix),
        consumer_group: "test_consumers".to_string(),
    })
    .expect("Failed to create queue")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_group_creation_is_idempotent() {
    let queue = scratch_queue();
    queue.init().await.expect("first init");
    queue.init().await.expect("second init should tolerate BUSYGROUP");
    assert_eq!(queue.len().await.expect("len"), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_dequeue_ack() {
    let queue = scratch_queue();
    queue.init().await.expect("init");

    let message = JobMessage::Continue(ContinueJobData {
        job_id: Some("job-1".into()),
        user_id: Some("user-1".into()),
        script: Some("hello there".into()),
        voice_id: None,
    });
    let id = queue.enqueue(&message).await.expect("enqueue");

    let entries = queue
        .dequeue("test-consumer", Duration::from_millis(1000), 1)
        .await
        .expect("dequeue");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, id);
    assert_eq!(entries[0].job_type, JobType::Continue);
    assert_eq!(
        entries[0].decode_continue().expect("decode").script.as_deref(),
        Some("hello there")
    );
    assert_eq!(queue.pending_count().await.expect("pending"), 1);

    queue.ack(&id).await.expect("ack");
    assert_eq!(queue.pending_count().await.expect("pending"), 0);

    let diagnostics = queue.diagnostics(5).await.expect("diagnostics");
    assert_eq!(diagnostics.stream_len, 1);
    assert_eq!(diagnostics.groups.len(), 1);
    assert_eq!(diagnostics.recent[0].id, id);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_empty_poll_returns_nothing() {
    let queue = scratch_queue();
    queue.init().await.expect("init");
    let entries = queue
        .dequeue("test-consumer", Duration::from_millis(100), 1)
        .await
        .expect("dequeue");
    assert!(entries.is_empty());

    queue
        .enqueue(&JobMessage::New(NewJobData::default()))
        .await
        .expect("enqueue");
    assert_eq!(queue.len().await.expect("len"), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_unacked_entry_of_dead_consumer_is_claimed() {
    let queue = scratch_queue();
    queue.init().await.expect("init");

    let id = queue
        .enqueue(&JobMessage::New(NewJobData {
            job_id: Some("job-crash".into()),
            ..NewJobData::default()
        }))
        .await
        .expect("enqueue");

    let first = queue
        .dequeue("worker-a", Duration::from_millis(500), 1)
        .await
        .expect("dequeue");
    assert_eq!(first[0].id, id);

    // worker-a never acks. New reads skip the entry.
    let fresh = queue
        .dequeue("worker-b", Duration::from_millis(100), 1)
        .await
        .expect("dequeue");
    assert!(fresh.is_empty());

    let not_yet = queue
        .claim_stale("worker-b", Duration::from_secs(60), 10)
        .await
        .expect("claim");
    assert!(not_yet.is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let claimed = queue
        .claim_stale("worker-b", Duration::from_millis(10), 10)
        .await
        .expect("claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(
        claimed[0].decode_new().expect("decode").job_id.as_deref(),
        Some("job-crash")
    );

    queue.ack(&id).await.expect("ack");
    assert_eq!(queue.pending_count().await.expect("pending"), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_status_merge_and_compare_and_set() {
    let store = RedisStatusStore::new(&redis_url()).expect("store");
    let job_id = uuid::Uuid::new_v4().to_string();

    store
        .set_fields(
            &job_id,
            &StatusUpdate::transition(JobStatus::PendingReview, Stage::ScriptReadyForReview)
                .user_id("user-1")
                .field(fields::GENERATED_SCRIPT, "draft"),
        )
        .await
        .expect("set");

    let claim = StatusUpdate::transition(JobStatus::Processing, Stage::ContinuationTriggered);
    assert!(store
        .compare_and_set(&job_id, JobStatus::PendingReview, None, &claim)
        .await
        .expect("cas"));
    assert!(!store
        .compare_and_set(&job_id, JobStatus::PendingReview, None, &claim)
        .await
        .expect("cas"));

    let record = store.get(&job_id).await.expect("get");
    assert_eq!(record.status(), Some(JobStatus::Processing));
    assert_eq!(record.user_id(), Some("user-1"));
    assert_eq!(record.generated_script(), Some("draft"));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_compare_and_set_on_missing_record() {
    let store = RedisStatusStore::new(&redis_url()).expect("store");
    let job_id = uuid::Uuid::new_v4().to_string();

    let applied = store
        .compare_and_set(
            &job_id,
            JobStatus::PendingReview,
            None,
            &StatusUpdate::stage_only(Stage::ContinuationTriggered),
        )
        .await
        .expect("cas");
    assert!(!applied);
    assert!(store.get(&job_id).await.expect("get").is_empty());
}
