//! Lemon Slice talking-head synthesis client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use remerge_models::DEFAULT_VOICE_ID;

use crate::capabilities::Synthesizer;
use crate::error::{ensure_success, env_nonempty, env_required, AiError, AiResult};
use crate::retry::{poll_until, retry_fixed_if, Poll, RetryPolicy};

const PROVIDER: &str = "lemon_slice";

pub const DEFAULT_BASE_URL: &str = "https://lemonslice.com/api/v2";

const RESOLUTION: &str = "512";

/// Lemon Slice configuration.
#[derive(Debug, Clone)]
pub struct LemonSliceConfig {
    pub api_key: String,
    pub base_url: String,
    /// Timeout for the initial `/generate` call
    pub submit_timeout: Duration,
    /// `/generate` resends, only when no generation can have started
    pub submit_retry: RetryPolicy,
    /// Generation polling (5s x 90, 15s per call)
    pub poll: RetryPolicy,
}

impl LemonSliceConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            submit_timeout: Duration::from_secs(30),
            submit_retry: RetryPolicy::new("lemon_slice_submit")
                .with_interval(Duration::from_secs(5))
                .with_max_attempts(3),
            poll: RetryPolicy::new("lemon_slice_generation")
                .with_interval(Duration::from_secs(5))
                .with_max_attempts(90)
                .with_per_call_timeout(Duration::from_secs(15)),
        }
    }

    pub fn from_env() -> AiResult<Self> {
        let mut config = Self::new(env_required("LEMON_SLICE_API_KEY")?);
        if let Some(url) = env_nonempty("LEMON_SLICE_API_URL") {
            config.base_url = url;
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    img_url: &'a str,
    text: &'a str,
    voice_id: &'a str,
    resolution: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    job_id: Option<String>,
    video_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationStatus {
    status: Option<String>,
    video_url: Option<String>,
    error_message: Option<String>,
}

/// Lemon Slice API client.
#[derive(Clone)]
pub struct LemonSliceClient {
    http: Client,
    config: LemonSliceConfig,
}

impl LemonSliceClient {
    pub fn new(config: LemonSliceConfig) -> AiResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> AiResult<Self> {
        Self::new(LemonSliceConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn wait_for_generation(&self, job_id: &str) -> AiResult<String> {
        let url = self.url(&format!("/generations/{}", job_id));
        poll_until(&self.config.poll, |attempt| {
            let request = self
                .http
                .get(&url)
                .bearer_auth(&self.config.api_key)
                .header("Accept", "application/json");
            async move {
                let response = request.send().await?;
                if response.status() == StatusCode::NOT_FOUND {
                    warn!(job_id = %job_id, attempt, "Generation not visible yet (404)");
                    return Ok(Poll::Pending);
                }
                let status: GenerationStatus =
                    ensure_success(PROVIDER, response).await?.json().await?;
                match status.status.as_deref() {
                    Some("completed") => status.video_url.map(Poll::Ready).ok_or_else(|| {
                        AiError::upstream_failed(PROVIDER, "generation completed without video_url")
                    }),
                    Some("failed") => Err(AiError::upstream_failed(
                        PROVIDER,
                        status
                            .error_message
                            .unwrap_or_else(|| "Unknown error".to_string()),
                    )),
                    Some("processing" | "queued" | "pending") => Ok(Poll::Pending),
                    other => {
                        warn!(job_id = %job_id, status = ?other, "Unknown generation status");
                        Ok(Poll::Pending)
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl Synthesizer for LemonSliceClient {
    async fn synthesize(
        &self,
        avatar_url: &str,
        script: &str,
        voice_id: Option<&str>,
    ) -> AiResult<String> {
        let voice_id = voice_id.filter(|v| !v.is_empty()).unwrap_or(DEFAULT_VOICE_ID);
        info!(voice_id = %voice_id, chars = script.chars().count(), "Submitting lip-sync generation");

        let url = self.url("/generate");
        let body = GenerateRequest {
            img_url: avatar_url,
            text: script,
            voice_id,
            resolution: RESOLUTION,
        };
        let submitted: GenerateResponse =
            retry_fixed_if(&self.config.submit_retry, AiError::is_safe_to_resend, || {
                let request = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .header("Accept", "application/json")
                    .timeout(self.config.submit_timeout)
                    .json(&body);
                async move {
                    let response = ensure_success(PROVIDER, request.send().await?).await?;
                    Ok::<GenerateResponse, AiError>(response.json().await?)
                }
            })
            .await?;

        match (submitted.job_id, submitted.video_url) {
            (Some(job_id), _) => {
                info!(lemon_slice_job = %job_id, "Lip-sync generation submitted");
                self.wait_for_generation(&job_id).await
            }
            (None, Some(url)) => {
                info!("Lip-sync video returned directly");
                Ok(url)
            }
            (None, None) => Err(AiError::invalid_response(
                PROVIDER,
                "response has neither job_id nor video_url",
            )),
        }
    }
}
