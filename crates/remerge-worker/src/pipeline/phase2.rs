//! Phase 2: from the approved script to the verified final video.

use std::time::Instant;

use tracing::{error, warn, Instrument};

use remerge_models::{fields, JobStatus, NewVideoRecord, Stage, StatusRecord, StatusUpdate};
use remerge_queue::ContinueJobData;
use remerge_supabase::DeductOutcome;

use crate::deps::PipelineDeps;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{passes_moderation, record, truncate_script, JobOutcome};

const PHASE: &str = "continue";

/// Credits charged per rendered video.
const RENDER_COST: i64 = 1;

/// Everything Phase 2 needs, resolved from the message and the stored record.
struct RenderInputs<'a> {
    user_id: &'a str,
    avatar_s3_key: &'a str,
    video_s3_key: Option<&'a str>,
    script: &'a str,
    voice_id: Option<&'a str>,
}

/// Run Phase 2 for one "continue" message.
///
/// The API leaves the job at `processing/continuation_triggered`. The worker
/// claims it by moving it to `charging_credits` with a compare-and-set, so a
/// redelivered message finds the job already claimed and is skipped without
/// a second charge.
pub async fn run_continue_job(
    deps: &PipelineDeps,
    message_id: &str,
    data: ContinueJobData,
) -> JobOutcome {
    let Some(job_id) = data.job_id.clone().filter(|id| !id.is_empty()) else {
        let reason = "Continue job data missing required 'job_id'".to_string();
        warn!(message_id = %message_id, "{}", reason);
        metrics::record_job_skipped(PHASE);
        return JobOutcome::Skipped { reason };
    };
    let logger = JobLogger::new(&job_id, PHASE);

    async {
        let stored = match deps.status.get(&job_id).await {
            Ok(stored) if !stored.is_empty() => stored,
            Ok(_) => return fail(deps, &job_id, None, &logger, "No status found for job").await,
            Err(e) => {
                let reason = format!("Could not read job status: {}", e);
                return fail(deps, &job_id, None, &logger, &reason).await;
            }
        };

        match claim(deps, &job_id).await {
            Ok(true) => {}
            Ok(false) if is_interrupted(&stored) => {
                return fail_interrupted(deps, &job_id, &stored, &logger).await;
            }
            Ok(false) => {
                let reason = format!(
                    "Job at {}/{} is not awaiting continuation, ignoring message",
                    stored.status().map(|s| s.as_str()).unwrap_or("unknown"),
                    stored.stage().map(|s| s.as_str()).unwrap_or("unknown"),
                );
                logger.log_warning(&reason);
                metrics::record_job_skipped(PHASE);
                return JobOutcome::Skipped { reason };
            }
            Err(e) => {
                let reason = format!("Could not claim job: {}", e);
                return fail(deps, &job_id, stored.user_id(), &logger, &reason).await;
            }
        }

        let inputs = match resolve_inputs(&stored, &data) {
            Ok(inputs) => inputs,
            Err(e) => {
                let reason = e.to_string();
                return fail(deps, &job_id, stored.user_id(), &logger, &reason).await;
            }
        };
        if let Some(sender) = data.user_id.as_deref().filter(|u| *u != inputs.user_id) {
            logger.log_warning(&format!(
                "Message user {} differs from job owner {}, using the owner",
                sender, inputs.user_id
            ));
        }

        logger.log_start(&format!("user {}", inputs.user_id));
        metrics::record_job_started(PHASE);
        let started = Instant::now();

        let outcome = match render(deps, &job_id, &inputs, &logger).await {
            Ok(final_url) => {
                complete(deps, &job_id, &inputs, stored.thumbnail_url(), &final_url, &logger).await;
                JobOutcome::Completed { final_url }
            }
            Err(e) => {
                let reason = e.to_string();
                logger.log_error(&reason);
                record(
                    deps.status.as_ref(),
                    &job_id,
                    StatusUpdate::failed(&reason).user_id(inputs.user_id),
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

async fn claim(deps: &PipelineDeps, job_id: &str) -> WorkerResult<bool> {
    Ok(deps
        .status
        .compare_and_set(
            job_id,
            JobStatus::Processing,
            Some(Stage::ContinuationTriggered),
            &StatusUpdate::stage_only(Stage::ChargingCredits),
        )
        .await?)
}

/// A record left mid-render: its worker stopped before a terminal write.
fn is_interrupted(stored: &StatusRecord) -> bool {
    stored.status() == Some(JobStatus::Processing)
        && stored.stage().is_some_and(|stage| stage.is_render_phase())
}

/// Close out a render another worker abandoned. Nothing is charged again;
/// the write is conditional on the stage seen so a live worker is not
/// overwritten.
async fn fail_interrupted(
    deps: &PipelineDeps,
    job_id: &str,
    stored: &StatusRecord,
    logger: &JobLogger,
) -> JobOutcome {
    let stage = stored.stage();
    let reason = format!(
        "Job was interrupted during {} and cannot be resumed",
        stage.map(|s| s.as_str()).unwrap_or("unknown")
    );
    let update = StatusUpdate::failed(&reason).maybe_user_id(stored.user_id());

    match deps
        .status
        .compare_and_set(job_id, JobStatus::Processing, stage, &update)
        .await
    {
        Ok(true) => {
            logger.log_error(&reason);
            metrics::record_job_failed(PHASE, "interrupted");
            JobOutcome::Failed { reason }
        }
        Ok(false) => {
            let reason = "Job moved on while closing an interrupted render, ignoring message"
                .to_string();
            logger.log_warning(&reason);
            metrics::record_job_skipped(PHASE);
            JobOutcome::Skipped { reason }
        }
        Err(e) => {
            error!(job_id = %job_id, "Failed to record interrupted job: {}", e);
            metrics::record_job_failed(PHASE, "interrupted");
            JobOutcome::Failed { reason }
        }
    }
}

fn resolve_inputs<'a>(
    stored: &'a StatusRecord,
    data: &'a ContinueJobData,
) -> WorkerResult<RenderInputs<'a>> {
    let user_id = stored
        .user_id()
        .ok_or_else(|| WorkerError::invalid_job("No user_id found in job status"))?;
    let avatar_s3_key = stored
        .avatar_s3_key()
        .ok_or_else(|| WorkerError::invalid_job("No avatar_s3_key found in job status"))?;
    let script = data
        .script
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| WorkerError::invalid_job("Continue job data missing required 'script'"))?;

    Ok(RenderInputs {
        user_id,
        avatar_s3_key,
        video_s3_key: stored.video_s3_key(),
        script,
        voice_id: data.voice_id.as_deref().filter(|v| !v.is_empty()),
    })
}

async fn render(
    deps: &PipelineDeps,
    job_id: &str,
    inputs: &RenderInputs<'_>,
    logger: &JobLogger,
) -> WorkerResult<String> {
    let status = deps.status.as_ref();

    match deps.credits.try_deduct(inputs.user_id, RENDER_COST).await? {
        DeductOutcome::Deducted { remaining } => {
            logger.log_progress(&format!("charged {} credit, {} left", RENDER_COST, remaining));
        }
        DeductOutcome::Insufficient { balance } => {
            return Err(WorkerError::InsufficientCredits { balance });
        }
    }

    record(status, job_id, StatusUpdate::stage_only(Stage::ModeratingFinalScript)).await;
    if !passes_moderation(deps.moderator.as_ref(), inputs.script, inputs.user_id).await {
        return Err(WorkerError::moderation_rejected(
            "Final script flagged by moderation.",
        ));
    }

    record(status, job_id, StatusUpdate::stage_only(Stage::LipSyncing)).await;
    let avatar_url = deps
        .urls
        .presign_get(inputs.avatar_s3_key, deps.settings.presign_expiry)
        .await?;
    let script = truncate_script(inputs.script, deps.settings.script_max_chars, job_id);
    let talking_head_url = deps
        .synthesizer
        .synthesize(&avatar_url, &script, inputs.voice_id)
        .await?;
    logger.log_progress("talking head ready");

    record(status, job_id, StatusUpdate::stage_only(Stage::RenderingFinal)).await;
    let original_url = match inputs.video_s3_key {
        Some(key) => match deps.urls.presign_get(key, deps.settings.presign_expiry).await {
            Ok(url) => Some(url),
            Err(e) => {
                logger.log_warning(&format!(
                    "Could not presign original video, rendering without it: {}",
                    e
                ));
                None
            }
        },
        None => None,
    };
    let final_url = deps
        .compositor
        .compose(&talking_head_url, original_url.as_deref(), &script)
        .await?;
    logger.log_progress("render finished");

    record(status, job_id, StatusUpdate::stage_only(Stage::VerifyingUrl)).await;
    if let Err(e) = deps.verifier.wait_until_reachable(&final_url).await {
        logger.log_warning(&format!("Final URL check failed: {}", e));
        return Err(WorkerError::job_failed(
            "Generated video URL did not become accessible.",
        ));
    }

    Ok(final_url)
}

async fn complete(
    deps: &PipelineDeps,
    job_id: &str,
    inputs: &RenderInputs<'_>,
    thumbnail_url: Option<&str>,
    final_url: &str,
    logger: &JobLogger,
) {
    record(
        deps.status.as_ref(),
        job_id,
        StatusUpdate::transition(JobStatus::Completed, Stage::Done)
            .user_id(inputs.user_id)
            .field(fields::FINAL_URL, final_url)
            .optional(fields::THUMBNAIL_URL, thumbnail_url),
    )
    .await;

    let entry = NewVideoRecord::new(inputs.user_id, final_url, job_id).with_thumbnail(thumbnail_url);
    if let Err(e) = deps.catalog.insert_record(&entry).await {
        error!(
            job_id = %job_id,
            user_id = %inputs.user_id,
            "Failed to catalog completed video: {}",
            e
        );
    }

    logger.log_completion(final_url);
    metrics::record_job_completed();
}

async fn fail(
    deps: &PipelineDeps,
    job_id: &str,
    user_id: Option<&str>,
    logger: &JobLogger,
    reason: &str,
) -> JobOutcome {
    logger.log_error(reason);
    record(
        deps.status.as_ref(),
        job_id,
        StatusUpdate::failed(reason).maybe_user_id(user_id),
    )
    .await;
    metrics::record_job_failed(PHASE, "invalid_job");
    JobOutcome::Failed {
        reason: reason.to_string(),
    }
}
