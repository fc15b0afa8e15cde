//! Capability contracts the pipeline depends on.
//!
//! The worker only sees these traits; concrete providers live in sibling
//! modules and tests substitute local fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AiResult;

/// Content-understanding result for a source video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub summary: String,
    pub thumbnail_url: Option<String>,
}

/// Moderation decision for a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Passed,
    Flagged { categories: Vec<String> },
}

impl ModerationVerdict {
    pub fn is_flagged(&self) -> bool {
        matches!(self, ModerationVerdict::Flagged { .. })
    }
}

/// Summarizes a video reachable at a (presigned) URL.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, video_url: &str) -> AiResult<VideoSummary>;
}

/// Writes and rewrites meme scripts.
#[async_trait]
pub trait ScriptWriter: Send + Sync {
    /// Narrator-style script from a video summary. Never empty on success.
    async fn generate_script(&self, summary: &str, user_id: &str) -> AiResult<String>;

    /// Rewrite `current_script` following the user's `prompt`.
    async fn regenerate_script(
        &self,
        current_script: &str,
        prompt: &str,
        context: Option<&str>,
        user_id: &str,
    ) -> AiResult<String>;
}

/// Content moderation.
#[async_trait]
pub trait Moderator: Send + Sync {
    /// Empty text passes without a provider call.
    async fn moderate(&self, text: &str, user_id: &str) -> AiResult<ModerationVerdict>;
}

/// Lip-synced talking-head synthesis.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Returns the URL of the talking-head video.
    async fn synthesize(
        &self,
        avatar_url: &str,
        script: &str,
        voice_id: Option<&str>,
    ) -> AiResult<String>;
}

/// Final video compositing.
#[async_trait]
pub trait Compositor: Send + Sync {
    /// Returns the URL of the rendered video.
    async fn compose(
        &self,
        talking_head_url: &str,
        original_video_url: Option<&str>,
        subtitles: &str,
    ) -> AiResult<String>;
}

/// Waits for a freshly rendered URL to become reachable.
#[async_trait]
pub trait UrlVerifier: Send + Sync {
    async fn wait_until_reachable(&self, url: &str) -> AiResult<()>;
}
