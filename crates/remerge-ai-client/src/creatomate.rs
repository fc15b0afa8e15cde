//! Creatomate template rendering client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capabilities::Compositor;
use crate::error::{ensure_success, env_nonempty, env_required, AiError, AiResult};
use crate::retry::{retry_fixed_if, RetryPolicy};

const PROVIDER: &str = "creatomate";

pub const DEFAULT_BASE_URL: &str = "https://api.creatomate.com/v1";

/// Creatomate configuration.
#[derive(Debug, Clone)]
pub struct CreatomateConfig {
    pub api_key: String,
    pub template_id: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Render submission; resent only when no render can have been created
    pub retry: RetryPolicy,
}

impl CreatomateConfig {
    pub fn new(api_key: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            template_id: template_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::new("creatomate_render")
                .with_interval(Duration::from_secs(3))
                .with_max_attempts(3),
        }
    }

    pub fn from_env() -> AiResult<Self> {
        let mut config = Self::new(
            env_required("CREATOMATE_API_KEY")?,
            env_required("CREATOMATE_TEMPLATE_ID")?,
        );
        if let Some(url) = env_nonempty("CREATOMATE_API_URL") {
            config.base_url = url;
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    template_id: &'a str,
    modifications: Modifications<'a>,
}

/// Placeholder names defined in the render template.
#[derive(Debug, Serialize)]
struct Modifications<'a> {
    #[serde(rename = "TalkingHeadVideo")]
    talking_head_video: &'a str,
    #[serde(rename = "Subtitles")]
    subtitles: &'a str,
    #[serde(rename = "OriginalVideo", skip_serializing_if = "Option::is_none")]
    original_video: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Render {
    url: Option<String>,
}

/// Creatomate API client.
#[derive(Clone)]
pub struct CreatomateClient {
    http: Client,
    config: CreatomateConfig,
}

impl CreatomateClient {
    pub fn new(config: CreatomateConfig) -> AiResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> AiResult<Self> {
        Self::new(CreatomateConfig::from_env()?)
    }
}

#[async_trait]
impl Compositor for CreatomateClient {
    async fn compose(
        &self,
        talking_head_url: &str,
        original_video_url: Option<&str>,
        subtitles: &str,
    ) -> AiResult<String> {
        info!(
            template_id = %self.config.template_id,
            with_original = original_video_url.is_some(),
            "Requesting render"
        );
        let url = format!("{}/renders", self.config.base_url.trim_end_matches('/'));
        let body = RenderRequest {
            template_id: &self.config.template_id,
            modifications: Modifications {
                talking_head_video: talking_head_url,
                subtitles,
                original_video: original_video_url,
            },
        };
        let renders: Vec<Render> =
            retry_fixed_if(&self.config.retry, AiError::is_safe_to_resend, || {
                let request = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(&body);
                async move {
                    let response = ensure_success(PROVIDER, request.send().await?).await?;
                    Ok::<Vec<Render>, AiError>(response.json().await?)
                }
            })
            .await?;

        let first = renders
            .into_iter()
            .next()
            .ok_or_else(|| AiError::upstream_failed(PROVIDER, "render list was empty"))?;
        let url = first
            .url
            .ok_or_else(|| AiError::invalid_response(PROVIDER, "render has no url"))?;
        info!(url = %url, "Render accepted");
        Ok(url)
    }
}
