//! Presigned upload URLs.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use remerge_models::UploadKind;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default = "default_upload_type")]
    pub upload_type: String,
}

fn default_upload_type() -> String {
    "video".to_string()
}

#[derive(Debug, Serialize)]
pub struct UploadUrlResponse {
    pub upload_url: String,
    pub object_key: String,
    pub max_size_bytes: u64,
}

fn parse_kind(upload_type: &str) -> Option<UploadKind> {
    match upload_type {
        "video" => Some(UploadKind::Video),
        "avatar" => Some(UploadKind::Avatar),
        _ => None,
    }
}

/// Issue a presigned PUT for a source video or an avatar image.
///
/// Objects land under `uploads/{videos|avatars}/{user}/`, so a key submitted
/// later can be checked against its owner by prefix.
pub async fn create_upload_url(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UploadUrlRequest>,
) -> ApiResult<Json<UploadUrlResponse>> {
    let kind = parse_kind(&request.upload_type).ok_or_else(|| {
        ApiError::bad_request("Invalid upload_type. Must be 'video' or 'avatar'.")
    })?;
    kind.validate(&request.filename, &request.content_type)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let object_key = kind.object_key(&user.uid, &Uuid::new_v4().to_string(), &request.filename);
    let upload_url = state
        .urls
        .presign_put(&object_key, &request.content_type, state.config.upload_url_expiry)
        .await
        .map_err(|e| {
            error!(user_id = %user.uid, "Failed to presign upload: {}", e);
            ApiError::internal("Could not generate upload URL.")
        })?;

    info!(user_id = %user.uid, object_key = %object_key, "Issued upload URL");

    Ok(Json(UploadUrlResponse {
        upload_url,
        object_key,
        max_size_bytes: kind.max_size_bytes(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_type_is_exact() {
        assert_eq!(parse_kind("avatar"), Some(UploadKind::Avatar));
        assert_eq!(parse_kind("video"), Some(UploadKind::Video));
        assert_eq!(parse_kind("Video"), None);
        assert_eq!(parse_kind("audio"), None);
    }
}
