//! Generated-video catalog rows.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Title given to every newly cataloged video.
pub const DEFAULT_VIDEO_TITLE: &str = "Untitled Video";

/// Row to insert once a job completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NewVideoRecord {
    pub user_id: String,
    pub video_url: String,
    pub job_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
}

impl NewVideoRecord {
    pub fn new(
        user_id: impl Into<String>,
        video_url: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            video_url: video_url.into(),
            job_id: job_id.into(),
            title: DEFAULT_VIDEO_TITLE.to_string(),
            thumbnail_url: None,
        }
    }

    pub fn with_thumbnail(mut self, thumbnail_url: Option<impl Into<String>>) -> Self {
        self.thumbnail_url = thumbnail_url.map(Into::into);
        self
    }
}

/// Stored catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedVideo {
    pub id: String,
    pub created_at: String,
    #[serde(default)]
    pub title: Option<String>,
    pub video_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Title change request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateTitleRequest {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults_title() {
        let record = NewVideoRecord::new("u", "https://cdn/v.mp4", "job").with_thumbnail(None::<String>);
        assert_eq!(record.title, DEFAULT_VIDEO_TITLE);
        assert_eq!(record.thumbnail_url, None);
    }

    #[test]
    fn test_title_length_bounds() {
        assert!(UpdateTitleRequest { title: String::new() }.validate().is_err());
        assert!(UpdateTitleRequest { title: "a".repeat(100) }.validate().is_ok());
        assert!(UpdateTitleRequest { title: "a".repeat(101) }.validate().is_err());
    }
}
