//! Phase 1: from submission to the review gate.

use std::time::Instant;

use tracing::{warn, Instrument};

use remerge_models::{fields, JobStatus, Stage, StatusRecord, StatusUpdate, FALLBACK_SCRIPT};
use remerge_queue::NewJobData;

use crate::deps::PipelineDeps;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{passes_moderation, record, JobOutcome};

const PHASE: &str = "new";

/// What Phase 1 stores for the reviewer.
#[derive(Debug, Default)]
struct Draft {
    script: String,
    summary: Option<String>,
    thumbnail_url: Option<String>,
}

/// Run Phase 1 for one "new" message.
///
/// `message_id` is the stream id, used as the status key when the payload
/// carries no `job_id`.
pub async fn run_new_job(deps: &PipelineDeps, message_id: &str, data: NewJobData) -> JobOutcome {
    let job_id = match data.job_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => {
            warn!(message_id = %message_id, "Job data has no job_id, using stream message id");
            message_id.to_string()
        }
    };
    let logger = JobLogger::new(&job_id, PHASE);

    async {
        let Some(user_id) = data.user_id.clone().filter(|u| !u.is_empty()) else {
            let reason = "Job data missing required 'user_id'".to_string();
            logger.log_error(&reason);
            record(deps.status.as_ref(), &job_id, StatusUpdate::failed(&reason)).await;
            metrics::record_job_failed(PHASE, "invalid_job");
            return JobOutcome::Failed { reason };
        };

        if let Some(reason) = redelivery_skip_reason(deps, &job_id).await {
            logger.log_warning(&reason);
            metrics::record_job_skipped(PHASE);
            return JobOutcome::Skipped { reason };
        }

        logger.log_start(&format!("user {}", user_id));
        metrics::record_job_started(PHASE);
        let started = Instant::now();

        let outcome = match generate_draft(deps, &job_id, &user_id, &data, &logger).await {
            Ok(()) => {
                logger.log_completion("script ready for review");
                metrics::record_job_suspended();
                JobOutcome::AwaitingReview
            }
            Err(e) => {
                let reason = e.to_string();
                logger.log_error(&reason);
                record(
                    deps.status.as_ref(),
                    &job_id,
                    StatusUpdate::failed(&reason).user_id(&user_id),
                )
                .await;
                metrics::record_job_failed(PHASE, e.kind());
                JobOutcome::Failed { reason }
            }
        };
        metrics::record_phase_duration(PHASE, started.elapsed().as_secs_f64());
        outcome
    }
    .instrument(logger.create_span())
    .await
}

/// A redelivered "new" message may only resume a job that has not left
/// Phase 1. Returns why the message should be skipped otherwise.
async fn redelivery_skip_reason(deps: &PipelineDeps, job_id: &str) -> Option<String> {
    let record: StatusRecord = match deps.status.get(job_id).await {
        Ok(record) => record,
        Err(e) => {
            warn!(job_id = %job_id, "Could not read status before Phase 1, proceeding: {}", e);
            return None;
        }
    };

    match (record.status(), record.stage()) {
        (None, _) | (Some(JobStatus::Queued), _) => None,
        (Some(JobStatus::Processing), stage) if stage.map_or(true, |s| s.is_initial_phase()) => {
            None
        }
        (status, stage) => Some(format!(
            "Job already at {}/{}, ignoring repeated new-job message",
            status.map(|s| s.as_str()).unwrap_or("unknown"),
            stage.map(|s| s.as_str()).unwrap_or("unknown"),
        )),
    }
}

async fn generate_draft(
    deps: &PipelineDeps,
    job_id: &str,
    user_id: &str,
    data: &NewJobData,
    logger: &JobLogger,
) -> WorkerResult<()> {
    let status = deps.status.as_ref();
    record(
        status,
        job_id,
        StatusUpdate::transition(JobStatus::Processing, Stage::Starting).user_id(user_id),
    )
    .await;

    let avatar_s3_key = data
        .avatar_s3_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| WorkerError::invalid_job("Job data missing required 'avatar_s3_key'"))?;
    let video_s3_key = data.video_s3_key.as_deref().filter(|k| !k.is_empty());

    let draft = if data.manual_script_mode {
        logger.log_progress("manual script mode, skipping script generation");
        Draft::default()
    } else if let Some(video_key) = video_s3_key {
        record(status, job_id, StatusUpdate::stage_only(Stage::Summarizing)).await;
        let video_url = deps
            .urls
            .presign_get(video_key, deps.settings.presign_expiry)
            .await?;
        let understood = deps.summarizer.summarize(&video_url).await?;
        logger.log_progress("video summarized");

        record(status, job_id, StatusUpdate::stage_only(Stage::GeneratingScript)).await;
        let script = deps
            .script_writer
            .generate_script(&understood.summary, user_id)
            .await?;
        Draft {
            script,
            summary: Some(understood.summary),
            thumbnail_url: understood.thumbnail_url,
        }
    } else {
        logger.log_progress("no source video, using the avatar-only script");
        record(status, job_id, StatusUpdate::stage_only(Stage::GeneratingScript)).await;
        Draft {
            script: FALLBACK_SCRIPT.to_string(),
            ..Draft::default()
        }
    };

    record(
        status,
        job_id,
        StatusUpdate::stage_only(Stage::ModeratingInitialScript),
    )
    .await;
    if !passes_moderation(deps.moderator.as_ref(), &draft.script, user_id).await {
        return Err(WorkerError::moderation_rejected(
            "Initial script flagged by moderation.",
        ));
    }

    record(
        status,
        job_id,
        StatusUpdate::transition(JobStatus::PendingReview, Stage::ScriptReadyForReview)
            .user_id(user_id)
            .field(fields::GENERATED_SCRIPT, draft.script)
            .field(fields::AVATAR_S3_KEY, avatar_s3_key)
            .optional(fields::VIDEO_S3_KEY, video_s3_key)
            .optional(fields::THUMBNAIL_URL, draft.thumbnail_url.as_deref())
            .optional(fields::SUMMARY, draft.summary.as_deref()),
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fakes::Harness;
    use remerge_ai_client::AiError;

    fn new_job(job_id: &str) -> NewJobData {
        NewJobData {
            job_id: Some(job_id.to_string()),
            user_id: Some("u1".to_string()),
            avatar_s3_key: Some("uploads/avatars/u1/a.png".to_string()),
            video_s3_key: None,
            manual_script_mode: false,
        }
    }

    #[tokio::test]
    async fn test_avatar_only_uses_fallback_script() {
        let harness = Harness::new().await;
        harness.seed_queued("j1", "u1").await;

        let outcome = run_new_job(&harness.deps, "1-0", new_job("j1")).await;
        assert_eq!(outcome, JobOutcome::AwaitingReview);

        assert_eq!(
            harness.status.transitions("j1").await,
            vec![
                (Some(JobStatus::Processing), Some(Stage::Starting)),
                (Some(JobStatus::Processing), Some(Stage::GeneratingScript)),
                (Some(JobStatus::Processing), Some(Stage::ModeratingInitialScript)),
                (Some(JobStatus::PendingReview), Some(Stage::ScriptReadyForReview)),
            ]
        );
        let record = harness.record("j1").await;
        assert_eq!(record.generated_script(), Some(FALLBACK_SCRIPT));
        assert_eq!(record.thumbnail_url(), None);
        assert_eq!(record.avatar_s3_key(), Some("uploads/avatars/u1/a.png"));
        assert_eq!(harness.summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn test_manual_mode_stores_empty_script() {
        let harness = Harness::new().await;
        let mut data = new_job("j2");
        data.manual_script_mode = true;
        data.video_s3_key = Some("uploads/videos/u1/v.mp4".to_string());

        let outcome = run_new_job(&harness.deps, "1-0", data).await;
        assert_eq!(outcome, JobOutcome::AwaitingReview);

        let record = harness.record("j2").await;
        assert_eq!(record.status(), Some(JobStatus::PendingReview));
        assert_eq!(record.generated_script(), Some(""));
        assert_eq!(record.thumbnail_url(), None);
        assert_eq!(harness.summarizer.calls(), 0);
        assert_eq!(harness.writer.generated(), 0);
    }

    #[tokio::test]
    async fn test_video_path_stores_summary_and_thumbnail() {
        let harness = Harness::new().await;
        let mut data = new_job("j3");
        data.video_s3_key = Some("uploads/videos/u1/v.mp4".to_string());

        run_new_job(&harness.deps, "1-0", data).await;

        let stages: Vec<_> = harness
            .status
            .transitions("j3")
            .await
            .into_iter()
            .map(|(_, stage)| stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                Some(Stage::Starting),
                Some(Stage::Summarizing),
                Some(Stage::GeneratingScript),
                Some(Stage::ModeratingInitialScript),
                Some(Stage::ScriptReadyForReview),
            ]
        );
        let record = harness.record("j3").await;
        assert_eq!(record.get(fields::SUMMARY), Some("A cat knocks over a glass."));
        assert_eq!(record.thumbnail_url(), Some("https://thumbs/v.jpg"));
        assert_eq!(record.generated_script(), Some("Script about: A cat knocks over a glass."));
        assert_eq!(record.video_s3_key(), Some("uploads/videos/u1/v.mp4"));
        assert_eq!(
            harness.summarizer.last_url().as_deref(),
            Some("https://bucket.test/uploads/videos/u1/v.mp4?expires=3600")
        );
    }

    #[tokio::test]
    async fn test_summarizer_failure_fails_job() {
        let harness = Harness::new().await;
        harness
            .summarizer
            .fail_with(AiError::timeout("twelve_labs_task after 20 attempts"));
        let mut data = new_job("j4");
        data.video_s3_key = Some("uploads/videos/u1/v.mp4".to_string());

        let outcome = run_new_job(&harness.deps, "1-0", data).await;
        assert!(matches!(outcome, JobOutcome::Failed { .. }));

        let record = harness.record("j4").await;
        assert_eq!(record.status(), Some(JobStatus::Failed));
        assert_eq!(record.stage(), Some(Stage::Error));
        assert_eq!(record.user_id(), Some("u1"));
        assert!(record.error_message().unwrap_or_default().contains("timed out"));
        assert_eq!(record.generated_script(), None);
    }

    #[tokio::test]
    async fn test_flagged_script_fails_job() {
        let harness = Harness::new().await;
        harness.moderator.flag(FALLBACK_SCRIPT);

        let outcome = run_new_job(&harness.deps, "1-0", new_job("j5")).await;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                reason: "Initial script flagged by moderation.".to_string()
            }
        );
        assert_eq!(harness.record("j5").await.status(), Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_moderation_error_counts_as_flagged() {
        let harness = Harness::new().await;
        harness.moderator.fail_calls(true);

        let outcome = run_new_job(&harness.deps, "1-0", new_job("j6")).await;
        assert!(matches!(outcome, JobOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_missing_user_records_failure() {
        let harness = Harness::new().await;
        let mut data = new_job("j7");
        data.user_id = None;

        run_new_job(&harness.deps, "1-0", data).await;

        let record = harness.record("j7").await;
        assert_eq!(record.status(), Some(JobStatus::Failed));
        assert_eq!(record.error_message(), Some("Job data missing required 'user_id'"));
    }

    #[tokio::test]
    async fn test_missing_avatar_fails_after_start() {
        let harness = Harness::new().await;
        let mut data = new_job("j8");
        data.avatar_s3_key = None;

        run_new_job(&harness.deps, "1-0", data).await;

        let transitions = harness.status.transitions("j8").await;
        assert_eq!(transitions.first(), Some(&(Some(JobStatus::Processing), Some(Stage::Starting))));
        assert_eq!(transitions.last(), Some(&(Some(JobStatus::Failed), Some(Stage::Error))));
    }

    #[tokio::test]
    async fn test_missing_job_id_uses_message_id() {
        let harness = Harness::new().await;
        let mut data = new_job("unused");
        data.job_id = None;

        run_new_job(&harness.deps, "1700000000000-0", data).await;

        assert_eq!(
            harness.record("1700000000000-0").await.status(),
            Some(JobStatus::PendingReview)
        );
    }

    #[tokio::test]
    async fn test_redelivery_after_review_gate_is_ignored() {
        let harness = Harness::new().await;
        run_new_job(&harness.deps, "1-0", new_job("j9")).await;
        let writes = harness.status.history("j9").await.len();

        let outcome = run_new_job(&harness.deps, "1-0", new_job("j9")).await;
        assert!(matches!(outcome, JobOutcome::Skipped { .. }));
        assert_eq!(harness.status.history("j9").await.len(), writes);
        assert_eq!(harness.record("j9").await.status(), Some(JobStatus::PendingReview));
    }

    #[tokio::test]
    async fn test_redelivery_mid_phase_resumes() {
        let harness = Harness::new().await;
        harness
            .status
            .insert(
                "j10",
                StatusUpdate::transition(JobStatus::Processing, Stage::GeneratingScript)
                    .user_id("u1"),
            )
            .await;

        let outcome = run_new_job(&harness.deps, "1-0", new_job("j10")).await;
        assert_eq!(outcome, JobOutcome::AwaitingReview);
    }

    #[tokio::test]
    async fn test_status_store_outage_does_not_abort() {
        let harness = Harness::new().await;
        harness.status.fail_writes(true);

        let outcome = run_new_job(&harness.deps, "1-0", new_job("j11")).await;
        assert_eq!(outcome, JobOutcome::AwaitingReview);
    }
}
