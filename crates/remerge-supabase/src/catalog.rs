//! Generated-video catalog (`generated_videos` table).

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use remerge_models::{GeneratedVideo, NewVideoRecord};

use crate::client::{eq, SupabaseClient};
use crate::error::SupabaseResult;

const GENERATED_VIDEOS: &str = "generated_videos";

/// Rows returned by [`Catalog::list_for_user`].
pub const LIST_LIMIT: usize = 50;

/// Permanent record of finished videos.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn insert_record(&self, record: &NewVideoRecord) -> SupabaseResult<()>;

    /// Newest first, at most [`LIST_LIMIT`] rows.
    async fn list_for_user(&self, user_id: &str) -> SupabaseResult<Vec<GeneratedVideo>>;

    /// Rename a video. Returns false when no row is owned by `user_id`.
    async fn update_title(&self, user_id: &str, video_id: &str, title: &str)
        -> SupabaseResult<bool>;
}

/// Supabase-backed catalog.
#[derive(Clone)]
pub struct VideoCatalog {
    client: SupabaseClient,
}

impl VideoCatalog {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Catalog for VideoCatalog {
    async fn insert_record(&self, record: &NewVideoRecord) -> SupabaseResult<()> {
        let _: Vec<serde_json::Value> = self
            .client
            .insert("insert_video", GENERATED_VIDEOS, record, None)
            .await?;
        info!(
            user_id = %record.user_id,
            job_id = %record.job_id,
            "Cataloged generated video"
        );
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> SupabaseResult<Vec<GeneratedVideo>> {
        self.client
            .select(
                "list_videos",
                GENERATED_VIDEOS,
                &[
                    (
                        "select",
                        "id,created_at,title,video_url,thumbnail_url".to_string(),
                    ),
                    ("user_id", eq(user_id)),
                    ("order", "created_at.desc".to_string()),
                    ("limit", LIST_LIMIT.to_string()),
                ],
            )
            .await
    }

    async fn update_title(
        &self,
        user_id: &str,
        video_id: &str,
        title: &str,
    ) -> SupabaseResult<bool> {
        let rows: Vec<serde_json::Value> = self
            .client
            .update(
                "update_video_title",
                GENERATED_VIDEOS,
                &[("id", eq(video_id)), ("user_id", eq(user_id))],
                &json!({ "title": title }),
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SupabaseConfig;
    use crate::retry::RetryConfig;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog_for(server: &MockServer) -> VideoCatalog {
        let mut config = SupabaseConfig::new(server.uri(), "key");
        config.retry = RetryConfig::none();
        VideoCatalog::new(SupabaseClient::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_insert_sends_default_title() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/generated_videos"))
            .and(body_json(json!({
                "user_id": "u1",
                "video_url": "https://cdn/final.mp4",
                "job_id": "j1",
                "title": "Untitled Video",
                "thumbnail_url": null
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        catalog_for(&server)
            .insert_record(&NewVideoRecord::new("u1", "https://cdn/final.mp4", "j1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("order", "created_at.desc"))
            .and(query_param("limit", "50"))
            .and(query_param("user_id", "eq.u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "v1",
                "created_at": "2025-01-01T00:00:00Z",
                "title": null,
                "video_url": "https://cdn/v1.mp4",
                "thumbnail_url": null
            }])))
            .mount(&server)
            .await;

        let videos = catalog_for(&server).list_for_user("u1").await.unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].title, None);
    }

    #[tokio::test]
    async fn test_update_title_reports_missing_row() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let updated = catalog_for(&server)
            .update_title("u1", "v-missing", "New")
            .await
            .unwrap();
        assert!(!updated);
    }
}
