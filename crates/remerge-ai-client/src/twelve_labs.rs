//! Twelve Labs video understanding client.
//!
//! A summary takes four calls: find or create the index, submit an
//! indexing task by URL, poll the task until the video is ready, then ask
//! for a summary. The thumbnail comes from the indexed video's HLS data.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::capabilities::{Summarizer, VideoSummary};
use crate::error::{ensure_success, env_nonempty, env_required, AiError, AiResult};
use crate::retry::{poll_until, retry_fixed, Poll, RetryPolicy};

const PROVIDER: &str = "twelve_labs";

pub const DEFAULT_BASE_URL: &str = "https://api.twelvelabs.io/v1.3";
pub const DEFAULT_INDEX_NAME: &str = "default_meme_index";

const SUMMARY_PROMPT: &str = "This is a short video clip being analyzed for a meme generator. \
Describe ONLY what you can visually see in the video - the subjects, their actions, and the setting. \
Be extremely specific and accurate about what's actually shown. \
If you see animals, specify the exact animals. If you see people, describe their actions precisely. \
Do not make assumptions beyond what is visually present.";

const SUMMARY_TEMPERATURE: f32 = 0.1;

/// Twelve Labs configuration.
#[derive(Debug, Clone)]
pub struct TwelveLabsConfig {
    pub api_key: String,
    pub base_url: String,
    pub index_name: String,
    /// Indexing task polling (5s x 20)
    pub task_poll: RetryPolicy,
    /// Summary requests (15s apart, 3 attempts, 90s each)
    pub summary_retry: RetryPolicy,
    /// Pause after creating an index and before summarizing
    pub settle_delay: Duration,
}

impl TwelveLabsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            task_poll: RetryPolicy::new("twelve_labs_task")
                .with_interval(Duration::from_secs(5))
                .with_max_attempts(20)
                .with_per_call_timeout(Duration::from_secs(30)),
            summary_retry: RetryPolicy::new("twelve_labs_summary")
                .with_interval(Duration::from_secs(15))
                .with_max_attempts(3)
                .with_per_call_timeout(Duration::from_secs(90)),
            settle_delay: Duration::from_secs(5),
        }
    }

    pub fn from_env() -> AiResult<Self> {
        let mut config = Self::new(env_required("TWELVE_LABS_API_KEY")?);
        if let Some(url) = env_nonempty("TWELVE_LABS_API_URL") {
            config.base_url = url;
        }
        if let Some(name) = env_nonempty("TWELVE_LABS_INDEX_NAME") {
            config.index_name = name;
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    data: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    #[serde(rename = "_id")]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: Option<String>,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    hls: Option<Hls>,
}

#[derive(Debug, Deserialize)]
struct Hls {
    #[serde(default)]
    thumbnail_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: Option<String>,
}

/// Twelve Labs API client.
#[derive(Clone)]
pub struct TwelveLabsClient {
    http: Client,
    config: TwelveLabsConfig,
}

impl TwelveLabsClient {
    pub fn new(config: TwelveLabsConfig) -> AiResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> AiResult<Self> {
        Self::new(TwelveLabsConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn find_index(&self) -> AiResult<Option<String>> {
        let response = self
            .http
            .get(self.url("/indexes"))
            .header("x-api-key", &self.config.api_key)
            .query(&[("index_name", self.config.index_name.as_str())])
            .send()
            .await?;
        let list: IndexList = ensure_success(PROVIDER, response).await?.json().await?;
        Ok(list.data.into_iter().find_map(|entry| entry.id))
    }

    /// Index id for the configured index name, creating the index if needed.
    pub async fn ensure_index(&self) -> AiResult<String> {
        if let Some(id) = self.find_index().await? {
            debug!(index = %self.config.index_name, index_id = %id, "Found existing index");
            return Ok(id);
        }

        info!(index = %self.config.index_name, "Index not found, creating");
        let body = json!({
            "index_name": self.config.index_name,
            "models": [
                { "model_name": "marengo2.7", "model_options": ["visual", "audio"] },
                { "model_name": "pegasus1.2", "model_options": ["visual", "audio"] },
            ],
            "addons": ["thumbnail"],
        });
        let response = self
            .http
            .post(self.url("/indexes"))
            .header("x-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            warn!(index = %self.config.index_name, "Index created concurrently, refetching");
            return self.find_index().await?.ok_or_else(|| {
                AiError::invalid_response(PROVIDER, "index missing after 409 conflict")
            });
        }

        let created: IdOnly = ensure_success(PROVIDER, response).await?.json().await?;
        let id = created
            .id
            .ok_or_else(|| AiError::invalid_response(PROVIDER, "created index has no _id"))?;
        info!(index_id = %id, "Created index");
        tokio::time::sleep(self.config.settle_delay).await;
        Ok(id)
    }

    /// Start indexing the video at `video_url`. Returns the task id.
    pub async fn submit_task(&self, index_id: &str, video_url: &str) -> AiResult<String> {
        let form = Form::new()
            .text("index_id", index_id.to_string())
            .text("video_url", video_url.to_string())
            .text("enable_video_stream", "true");
        let response = self
            .http
            .post(self.url("/tasks"))
            .header("x-api-key", &self.config.api_key)
            .multipart(form)
            .send()
            .await?;
        let task: IdOnly = ensure_success(PROVIDER, response).await?.json().await?;
        task.id
            .ok_or_else(|| AiError::invalid_response(PROVIDER, "task response has no _id"))
    }

    /// Poll the indexing task until it yields a video id.
    pub async fn wait_for_video(&self, task_id: &str) -> AiResult<String> {
        let url = self.url(&format!("/tasks/{}", task_id));
        poll_until(&self.config.task_poll, |_| {
            let request = self
                .http
                .get(&url)
                .header("x-api-key", &self.config.api_key);
            async move {
                let response = ensure_success(PROVIDER, request.send().await?).await?;
                let task: TaskStatus = response.json().await?;
                match task.status.as_deref() {
                    Some("ready") => task.video_id.map(Poll::Ready).ok_or_else(|| {
                        AiError::upstream_failed(PROVIDER, "task ready without video_id")
                    }),
                    Some(status @ ("failed" | "error")) => Err(AiError::upstream_failed(
                        PROVIDER,
                        format!("indexing task {}", status),
                    )),
                    _ => Ok(Poll::Pending),
                }
            }
        })
        .await
    }

    /// First HLS thumbnail of an indexed video. Lookup failures only warn.
    pub async fn thumbnail(&self, index_id: &str, video_id: &str) -> Option<String> {
        let result: AiResult<VideoInfo> = async {
            let response = self
                .http
                .get(self.url(&format!("/indexes/{}/videos/{}", index_id, video_id)))
                .header("x-api-key", &self.config.api_key)
                .send()
                .await?;
            Ok(ensure_success(PROVIDER, response).await?.json().await?)
        }
        .await;

        match result {
            Ok(info) => {
                let thumbnail = info.hls.and_then(|hls| hls.thumbnail_urls.into_iter().next());
                if thumbnail.is_none() {
                    warn!(video_id = %video_id, "No thumbnail URLs in video metadata");
                }
                thumbnail
            }
            Err(e) => {
                warn!(video_id = %video_id, "Failed to fetch video metadata: {}", e);
                None
            }
        }
    }

    /// Summary of an indexed video; retried, never empty on success.
    pub async fn request_summary(&self, video_id: &str) -> AiResult<String> {
        let body = json!({
            "video_id": video_id,
            "type": "summary",
            "prompt": SUMMARY_PROMPT,
            "temperature": SUMMARY_TEMPERATURE,
        });
        let url = self.url("/summarize");
        retry_fixed(&self.config.summary_retry, || {
            let request = self
                .http
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .json(&body);
            async move {
                let response = ensure_success(PROVIDER, request.send().await?).await?;
                let parsed: SummaryResponse = response.json().await?;
                parsed
                    .summary
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| AiError::invalid_response(PROVIDER, "no summary in response"))
            }
        })
        .await
    }
}

#[async_trait]
impl Summarizer for TwelveLabsClient {
    async fn summarize(&self, video_url: &str) -> AiResult<VideoSummary> {
        let index_id = self.ensure_index().await?;
        let task_id = self.submit_task(&index_id, video_url).await?;
        info!(task_id = %task_id, "Submitted indexing task");

        let video_id = self.wait_for_video(&task_id).await?;
        info!(video_id = %video_id, "Video indexed");

        let thumbnail_url = self.thumbnail(&index_id, &video_id).await;
        tokio::time::sleep(self.config.settle_delay).await;
        let summary = self.request_summary(&video_id).await?;

        Ok(VideoSummary {
            summary,
            thumbnail_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TwelveLabsClient {
        let mut config = TwelveLabsConfig::new("tl-key");
        config.base_url = server.uri();
        config.settle_delay = Duration::ZERO;
        config.task_poll = config
            .task_poll
            .with_interval(Duration::from_millis(1))
            .with_max_attempts(3);
        config.summary_retry = config
            .summary_retry
            .with_interval(Duration::from_millis(1));
        TwelveLabsClient::new(config).unwrap()
    }

    async fn mount_ready_task(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_id": "t1"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "indexing"})),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ready", "video_id": "v1"})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_summarize_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .and(header("x-api-key", "tl-key"))
            .and(query_param("index_name", DEFAULT_INDEX_NAME))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"_id": "idx1"}]})))
            .mount(&server)
            .await;
        mount_ready_task(&server).await;
        Mock::given(method("GET"))
            .and(path("/indexes/idx1/videos/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hls": {"thumbnail_urls": ["https://thumbs/v1.jpg", "https://thumbs/v1b.jpg"]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/summarize"))
            .and(body_partial_json(json!({"video_id": "v1", "type": "summary"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"summary": "A cat jumps."})),
            )
            .mount(&server)
            .await;

        let result = client_for(&server)
            .summarize("https://bucket/video.mp4")
            .await
            .unwrap();
        assert_eq!(result.summary, "A cat jumps.");
        assert_eq!(result.thumbnail_url.as_deref(), Some("https://thumbs/v1.jpg"));
    }

    #[tokio::test]
    async fn test_index_conflict_refetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"_id": "idx9"}]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).ensure_index().await.unwrap(), "idx9");
    }

    #[tokio::test]
    async fn test_failed_task_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/t2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "failed"})))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).wait_for_video("t2").await.unwrap_err();
        assert!(matches!(err, AiError::UpstreamFailed { .. }));
    }

    #[tokio::test]
    async fn test_empty_summary_is_retried_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/summarize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"summary": ""})))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server).request_summary("v1").await.unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_missing_thumbnail_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes/idx1/videos/v1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert_eq!(client_for(&server).thumbnail("idx1", "v1").await, None);
    }
}
