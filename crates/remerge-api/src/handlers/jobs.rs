//! Job submission, status, continuation and script regeneration.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use validator::Validate;

use remerge_models::{fields, JobId, JobStatus, Stage, StatusRecord, StatusUpdate, UploadKind, VoiceTier};
use remerge_queue::{ContinueJobData, JobMessage, NewJobData};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

const JOB_NOT_FOUND: &str = "Job not found or status expired.";
const QUEUE_UNAVAILABLE: &str = "Job queue unavailable.";
const STATUS_UNAVAILABLE: &str = "Status check unavailable.";

#[derive(Debug, Deserialize)]
pub struct GenerateMemeRequest {
    pub avatar_s3_key: String,
    #[serde(default)]
    pub video_s3_key: Option<String>,
    #[serde(default)]
    pub manual_script_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub message: String,
}

/// Reject keys outside the caller's own upload folder for `kind`.
fn check_upload_key(kind: UploadKind, user_id: &str, key: &str) -> ApiResult<()> {
    let prefix = format!("{}/{}/", kind.folder(), user_id);
    if key.starts_with(&prefix) && !key.contains("..") {
        Ok(())
    } else {
        Err(ApiError::forbidden("Not authorized to use this upload."))
    }
}

/// Accept a generation request and enqueue its "new" job.
///
/// The credit check here is advisory; the worker deducts the render credit
/// when the reviewed script is continued.
pub async fn generate_meme(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<GenerateMemeRequest>,
) -> ApiResult<Json<JobAcceptedResponse>> {
    let avatar_s3_key = request.avatar_s3_key.trim();
    if avatar_s3_key.is_empty() {
        return Err(ApiError::bad_request("avatar_s3_key is required."));
    }
    check_upload_key(UploadKind::Avatar, &user.uid, avatar_s3_key)?;
    let video_s3_key = request
        .video_s3_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());
    if let Some(key) = video_s3_key {
        check_upload_key(UploadKind::Video, &user.uid, key)?;
    }

    let credits = state.credits.get_balance(&user.uid).await.map_err(|e| {
        error!(user_id = %user.uid, "Failed to fetch credits: {}", e);
        ApiError::internal("Could not fetch credit balance.")
    })?;
    if credits <= 0 {
        info!(user_id = %user.uid, credits, "Rejected generation request without credits");
        return Err(ApiError::payment_required("Insufficient credits."));
    }

    let job_id = JobId::new();
    let initial = StatusUpdate::transition(JobStatus::Queued, Stage::Queued)
        .user_id(&user.uid)
        .field(fields::AVATAR_S3_KEY, avatar_s3_key)
        .optional(fields::VIDEO_S3_KEY, video_s3_key);
    state
        .status
        .set_fields(job_id.as_str(), &initial)
        .await
        .map_err(|e| {
            error!(job_id = %job_id, "Failed to write initial job status: {}", e);
            ApiError::unavailable(QUEUE_UNAVAILABLE)
        })?;

    let message = JobMessage::New(NewJobData {
        job_id: Some(job_id.to_string()),
        user_id: Some(user.uid.clone()),
        avatar_s3_key: Some(avatar_s3_key.to_string()),
        video_s3_key: video_s3_key.map(str::to_string),
        manual_script_mode: request.manual_script_mode,
    });

    if let Err(e) = state.queue.enqueue(&message).await {
        error!(job_id = %job_id, "Failed to enqueue job: {}", e);
        metrics::record_job_enqueue_failed("new");
        mark_failed(&state, job_id.as_str(), &user.uid, "Failed to queue generation job.").await;
        return Err(ApiError::unavailable(QUEUE_UNAVAILABLE));
    }

    metrics::record_job_enqueued("new");
    info!(
        job_id = %job_id,
        user_id = %user.uid,
        has_video = video_s3_key.is_some(),
        manual = request.manual_script_mode,
        "Enqueued meme job"
    );

    Ok(Json(JobAcceptedResponse {
        job_id: job_id.to_string(),
        message: "Meme generation job queued successfully.".to_string(),
    }))
}

async fn mark_failed(state: &AppState, job_id: &str, user_id: &str, reason: &str) {
    let update = StatusUpdate::failed(reason).user_id(user_id);
    if let Err(e) = state.status.set_fields(job_id, &update).await {
        error!(job_id = %job_id, "Failed to record job failure: {}", e);
    }
}

/// Load a job record, enforcing that it exists and is owned by `user_id`.
async fn load_owned_record(
    state: &AppState,
    job_id: &str,
    user_id: &str,
    forbidden: &'static str,
) -> ApiResult<StatusRecord> {
    if !JobId::is_well_formed(job_id) {
        return Err(ApiError::not_found(JOB_NOT_FOUND));
    }

    let record = state.status.get(job_id).await.map_err(|e| {
        error!(job_id = %job_id, "Failed to read job status: {}", e);
        ApiError::unavailable(STATUS_UNAVAILABLE)
    })?;
    if record.is_empty() {
        return Err(ApiError::not_found(JOB_NOT_FOUND));
    }
    if !record.is_owned_by(user_id) {
        warn!(
            job_id = %job_id,
            user_id = %user_id,
            owner = record.user_id().unwrap_or("unknown"),
            "Job accessed by non-owner"
        );
        return Err(ApiError::forbidden(forbidden));
    }
    Ok(record)
}

/// Current status record of one of the caller's jobs.
pub async fn get_job_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<HashMap<String, String>>> {
    let record = load_owned_record(
        &state,
        &job_id,
        &user.uid,
        "Not authorized to view this job status.",
    )
    .await?;
    Ok(Json(record.into_map()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ContinueGenerationRequest {
    #[validate(length(min = 1))]
    pub script: String,
    #[serde(default)]
    pub voice_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContinueResponse {
    pub message: String,
    pub job_id: String,
}

/// Accept the reviewed script and enqueue the "continue" job.
///
/// The `pending_review -> processing/continuation_triggered` move is a
/// compare-and-set, so of two racing requests exactly one is queued.
pub async fn continue_generation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
    Json(request): Json<ContinueGenerationRequest>,
) -> ApiResult<Json<ContinueResponse>> {
    request.validate()?;
    if request.script.trim().is_empty() {
        return Err(ApiError::Validation("script: must not be blank".to_string()));
    }

    let record = load_owned_record(
        &state,
        &job_id,
        &user.uid,
        "Not authorized to continue this job.",
    )
    .await?;

    if record.status() != Some(JobStatus::PendingReview) {
        let current = record.get(fields::STATUS).unwrap_or("unknown");
        return Err(ApiError::bad_request(format!(
            "Job is not awaiting review (current status: {}).",
            current
        )));
    }

    let voice_id = request
        .voice_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(voice) = voice_id {
        check_voice(&state, &user.uid, voice).await?;
    }

    let claimed = state
        .status
        .compare_and_set(
            &job_id,
            JobStatus::PendingReview,
            None,
            &StatusUpdate::transition(JobStatus::Processing, Stage::ContinuationTriggered),
        )
        .await
        .map_err(|e| {
            error!(job_id = %job_id, "Failed to claim job for continuation: {}", e);
            ApiError::unavailable(QUEUE_UNAVAILABLE)
        })?;
    if !claimed {
        info!(job_id = %job_id, "Continuation already accepted for job");
        return Err(ApiError::conflict("Job continuation already in progress."));
    }

    let message = JobMessage::Continue(ContinueJobData {
        job_id: Some(job_id.clone()),
        user_id: Some(user.uid.clone()),
        script: Some(request.script),
        voice_id: voice_id.map(str::to_string),
    });

    if let Err(e) = state.queue.enqueue(&message).await {
        error!(job_id = %job_id, "Failed to enqueue continuation: {}", e);
        metrics::record_job_enqueue_failed("continue");
        mark_failed(&state, &job_id, &user.uid, "Failed to queue continuation task.").await;
        return Err(ApiError::unavailable(QUEUE_UNAVAILABLE));
    }

    metrics::record_job_enqueued("continue");
    info!(job_id = %job_id, user_id = %user.uid, voice = ?voice_id, "Enqueued continuation");

    Ok(Json(ContinueResponse {
        message: "Generation continuation job queued successfully.".to_string(),
        job_id,
    }))
}

/// Reject voices outside the caller's plan tier.
async fn check_voice(state: &AppState, user_id: &str, voice_id: &str) -> ApiResult<()> {
    let profile = state.profiles.get_profile(user_id).await.map_err(|e| {
        error!(user_id = %user_id, "Failed to fetch profile for voice check: {}", e);
        ApiError::internal("Could not verify voice selection.")
    })?;
    let plan = profile.map(|p| p.plan()).unwrap_or_default();
    let tier = VoiceTier::for_plan(plan);

    if tier.allows(voice_id) {
        Ok(())
    } else {
        info!(user_id = %user_id, voice_id = %voice_id, tier = tier.as_str(), "Voice not in plan");
        Err(ApiError::forbidden("Selected voice is not available on your plan."))
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegenerateScriptRequest {
    #[validate(length(min = 1))]
    pub current_script: String,
    #[validate(length(min = 1))]
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegenerateScriptResponse {
    pub regenerated_script: String,
    pub message: String,
}

/// Rewrite a draft script following the user's instruction.
pub async fn regenerate_script(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<RegenerateScriptRequest>,
) -> ApiResult<Json<RegenerateScriptResponse>> {
    request.validate()?;

    let context = request.context.as_deref().filter(|c| !c.trim().is_empty());
    let regenerated_script = state
        .script_writer
        .regenerate_script(&request.current_script, &request.prompt, context, &user.uid)
        .await
        .map_err(|e| {
            error!(user_id = %user.uid, "Script regeneration failed: {}", e);
            ApiError::internal("Error regenerating script.")
        })?;

    Ok(Json(RegenerateScriptResponse {
        regenerated_script,
        message: "Script regenerated successfully".to_string(),
    }))
}
