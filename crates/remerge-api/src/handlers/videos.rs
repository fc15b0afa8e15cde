//! Generated-video catalog handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use validator::Validate;

use remerge_models::{GeneratedVideo, UpdateTitleRequest};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// A finished video as the frontend lists it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoCreation {
    pub id: String,
    pub created_at: String,
    pub title: Option<String>,
    pub url: String,
    pub thumbnail: Option<String>,
}

impl From<GeneratedVideo> for VideoCreation {
    fn from(video: GeneratedVideo) -> Self {
        Self {
            id: video.id,
            created_at: video.created_at,
            title: video.title,
            url: video.video_url,
            thumbnail: video.thumbnail_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PastVideosResponse {
    pub videos: Vec<VideoCreation>,
}

/// The caller's most recent videos, newest first.
pub async fn list_past_videos(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<PastVideosResponse>> {
    let videos = state.catalog.list_for_user(&user.uid).await.map_err(|e| {
        error!(user_id = %user.uid, "Failed to list videos: {}", e);
        ApiError::internal("Could not fetch past videos.")
    })?;
    Ok(Json(PastVideosResponse {
        videos: videos.into_iter().map(VideoCreation::from).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Rename one of the caller's videos.
pub async fn update_video_title(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
    Json(request): Json<UpdateTitleRequest>,
) -> ApiResult<Json<MessageResponse>> {
    request.validate()?;

    let updated = state
        .catalog
        .update_title(&user.uid, &video_id, &request.title)
        .await
        .map_err(|e| {
            error!(user_id = %user.uid, video_id = %video_id, "Failed to update title: {}", e);
            ApiError::internal("Could not update video title.")
        })?;
    if !updated {
        return Err(ApiError::not_found("Video not found or not owned by user."));
    }

    info!(user_id = %user.uid, video_id = %video_id, "Updated video title");
    Ok(Json(MessageResponse {
        message: "Video title updated successfully".to_string(),
    }))
}
