//! OpenAI chat and moderation client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capabilities::{ModerationVerdict, Moderator, ScriptWriter};
use crate::error::{ensure_success, env_nonempty, env_required, AiError, AiResult};
use crate::retry::{retry_fixed, RetryPolicy};

const PROVIDER: &str = "openai";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const SCRIPT_MODEL: &str = "gpt-4o";
pub const MODERATION_MODEL: &str = "text-moderation-latest";

const SCRIPT_SYSTEM_PROMPT: &str = "You are a witty meme creator. Given a summary of a video, you create a funny narrator-style script spoken by one person (no brackets or colons - the text should be fully speakable), suitable for a talking head meme.";

const REWRITE_SYSTEM_PROMPT: &str = "You are a creative script writer for short, entertaining video memes. \n\
Your task is to modify an existing script based on the user's request.\n\
Keep the spirit of the original script while incorporating the requested changes.\n\
The output should be purely the modified script without any explanations, notes, or formatting.\n\
Keep the length similar to the original script.";

const SCRIPT_TEMPERATURE: f32 = 0.7;
const SCRIPT_MAX_TOKENS: u32 = 300;
const REWRITE_MAX_TOKENS: u32 = 500;

/// OpenAI configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Chat and moderation requests (2s apart, 3 attempts)
    pub retry: RetryPolicy,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::new("openai")
                .with_interval(Duration::from_secs(2))
                .with_max_attempts(3),
        }
    }

    pub fn from_env() -> AiResult<Self> {
        let mut config = Self::new(env_required("OPENAI_API_KEY")?);
        if let Some(url) = env_nonempty("OPENAI_API_URL") {
            config.base_url = url;
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    user: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
    model: &'static str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: BTreeMap<String, bool>,
}

/// OpenAI API client.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> AiResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> AiResult<Self> {
        Self::new(OpenAiConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn chat(
        &self,
        system: &str,
        user_message: &str,
        max_tokens: u32,
        user_id: &str,
    ) -> AiResult<String> {
        let body = ChatRequest {
            model: SCRIPT_MODEL,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            temperature: SCRIPT_TEMPERATURE,
            max_tokens,
            user: user_id,
        };

        let url = self.url("/chat/completions");
        let parsed: ChatResponse = retry_fixed(&self.config.retry, || {
            let request = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body);
            async move {
                let response = ensure_success(PROVIDER, request.send().await?).await?;
                Ok::<ChatResponse, AiError>(response.json().await?)
            }
        })
        .await?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(AiError::invalid_response(PROVIDER, "model returned an empty script"));
        }
        Ok(text)
    }
}

/// User message for a script rewrite.
fn rewrite_message(current_script: &str, prompt: &str, context: Option<&str>) -> String {
    let mut message = format!(
        "CURRENT SCRIPT:\n{}\n\nMODIFICATION REQUEST:\n{}\n",
        current_script, prompt
    );
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        message.push_str(&format!("\nCONTEXT ABOUT THE VIDEO:\n{}", context));
    }
    message
}

#[async_trait]
impl ScriptWriter for OpenAiClient {
    async fn generate_script(&self, summary: &str, user_id: &str) -> AiResult<String> {
        let user_message = format!(
            "Video Summary:\n```\n{}\n```\nGenerate a short, funny meme script based on this summary:",
            summary
        );
        let script = self
            .chat(SCRIPT_SYSTEM_PROMPT, &user_message, SCRIPT_MAX_TOKENS, user_id)
            .await?;
        debug!(user_id = %user_id, chars = script.chars().count(), "Generated script");
        Ok(script)
    }

    async fn regenerate_script(
        &self,
        current_script: &str,
        prompt: &str,
        context: Option<&str>,
        user_id: &str,
    ) -> AiResult<String> {
        let user_message = rewrite_message(current_script, prompt, context);
        self.chat(REWRITE_SYSTEM_PROMPT, &user_message, REWRITE_MAX_TOKENS, user_id)
            .await
    }
}

#[async_trait]
impl Moderator for OpenAiClient {
    async fn moderate(&self, text: &str, user_id: &str) -> AiResult<ModerationVerdict> {
        if text.is_empty() {
            warn!(user_id = %user_id, "Moderation received empty text, skipping");
            return Ok(ModerationVerdict::Passed);
        }

        let url = self.url("/moderations");
        let body = ModerationRequest {
            input: text,
            model: MODERATION_MODEL,
        };
        let parsed: ModerationResponse = retry_fixed(&self.config.retry, || {
            let request = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body);
            async move {
                let response = ensure_success(PROVIDER, request.send().await?).await?;
                Ok::<ModerationResponse, AiError>(response.json().await?)
            }
        })
        .await?;
        let result = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AiError::invalid_response(PROVIDER, "moderation returned no results"))?;

        if result.flagged {
            let categories: Vec<String> = result
                .categories
                .into_iter()
                .filter_map(|(name, hit)| hit.then_some(name))
                .collect();
            warn!(user_id = %user_id, ?categories, "Moderation flagged text");
            return Ok(ModerationVerdict::Flagged { categories });
        }

        info!(user_id = %user_id, "Text passed moderation");
        Ok(ModerationVerdict::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiClient {
        let mut config = OpenAiConfig::new("sk-test");
        config.base_url = server.uri();
        config.retry = config.retry.with_interval(Duration::from_millis(1));
        OpenAiClient::new(config).unwrap()
    }

    fn chat_reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    #[tokio::test]
    async fn test_generate_script_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "max_tokens": 300,
                "user": "u1",
                "messages": [
                    {"role": "system", "content": SCRIPT_SYSTEM_PROMPT},
                    {"role": "user", "content": "Video Summary:\n```\nA dog surfs.\n```\nGenerate a short, funny meme script based on this summary:"}
                ]
            })))
            .respond_with(chat_reply("  Surf's up, pup!  "))
            .expect(1)
            .mount(&server)
            .await;

        let script = client_for(&server)
            .generate_script("A dog surfs.", "u1")
            .await
            .unwrap();
        assert_eq!(script, "Surf's up, pup!");
    }

    #[tokio::test]
    async fn test_generate_script_recovers_from_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(chat_reply("Second time lucky"))
            .expect(1)
            .mount(&server)
            .await;

        let script = client_for(&server)
            .generate_script("summary", "u1")
            .await
            .unwrap();
        assert_eq!(script, "Second time lucky");
    }

    #[tokio::test]
    async fn test_chat_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .regenerate_script("Old", "shorter", None, "u1")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn test_empty_script_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(chat_reply("   "))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_script("summary", "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_regenerate_uses_larger_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"max_tokens": 500})))
            .respond_with(chat_reply("New script"))
            .expect(1)
            .mount(&server)
            .await;

        let script = client_for(&server)
            .regenerate_script("Old", "make it rhyme", None, "u1")
            .await
            .unwrap();
        assert_eq!(script, "New script");
    }

    #[test]
    fn test_rewrite_message_context() {
        assert_eq!(
            rewrite_message("Old", "shorter", None),
            "CURRENT SCRIPT:\nOld\n\nMODIFICATION REQUEST:\nshorter\n"
        );
        assert!(rewrite_message("Old", "shorter", Some("a cat"))
            .ends_with("\nCONTEXT ABOUT THE VIDEO:\na cat"));
    }

    #[tokio::test]
    async fn test_moderation_flagged_categories() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/moderations"))
            .and(body_partial_json(json!({"model": MODERATION_MODEL})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "flagged": true,
                    "categories": {"hate": false, "violence": true}
                }]
            })))
            .mount(&server)
            .await;

        let verdict = client_for(&server).moderate("bad words", "u1").await.unwrap();
        assert_eq!(
            verdict,
            ModerationVerdict::Flagged {
                categories: vec!["violence".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_moderation_retries_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/moderations"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/moderations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"flagged": false, "categories": {}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let verdict = client_for(&server).moderate("fine words", "u1").await.unwrap();
        assert_eq!(verdict, ModerationVerdict::Passed);
    }

    #[tokio::test]
    async fn test_empty_text_skips_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let verdict = client_for(&server).moderate("", "u1").await.unwrap();
        assert_eq!(verdict, ModerationVerdict::Passed);
    }
}
