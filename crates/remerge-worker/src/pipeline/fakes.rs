//! Local capability fakes and a wired-up harness for pipeline tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use remerge_ai_client::{
    AiError, AiResult, Compositor, ModerationVerdict, Moderator, ScriptWriter, Summarizer,
    Synthesizer, UrlVerifier, VideoSummary,
};
use remerge_models::{fields, JobStatus, Stage, StatusRecord, StatusUpdate};
use remerge_queue::memory::InMemoryStatusStore;
use remerge_queue::StatusStore;
use remerge_storage::StaticObjectUrls;
use remerge_supabase::memory::{InMemoryCatalog, InMemoryProfiles};

use crate::deps::{PipelineDeps, PipelineSettings};

pub const TALKING_HEAD_URL: &str = "https://ls/head.mp4";
pub const FINAL_URL: &str = "https://cdn/final.mp4";

fn take_failure(slot: &Mutex<Option<AiError>>) -> AiResult<()> {
    match slot.lock().unwrap().take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[derive(Default)]
pub struct FakeSummarizer {
    calls: AtomicUsize,
    last_url: Mutex<Option<String>>,
    failure: Mutex<Option<AiError>>,
}

impl FakeSummarizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().unwrap().clone()
    }

    /// Fail the next call with `err`.
    pub fn fail_with(&self, err: AiError) {
        *self.failure.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, video_url: &str) -> AiResult<VideoSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().unwrap() = Some(video_url.to_string());
        take_failure(&self.failure)?;
        Ok(VideoSummary {
            summary: "A cat knocks over a glass.".to_string(),
            thumbnail_url: Some("https://thumbs/v.jpg".to_string()),
        })
    }
}

#[derive(Default)]
pub struct FakeWriter {
    generated: AtomicUsize,
}

impl FakeWriter {
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptWriter for FakeWriter {
    async fn generate_script(&self, summary: &str, _user_id: &str) -> AiResult<String> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Script about: {}", summary))
    }

    async fn regenerate_script(
        &self,
        current_script: &str,
        prompt: &str,
        _context: Option<&str>,
        _user_id: &str,
    ) -> AiResult<String> {
        Ok(format!("{} ({})", current_script, prompt))
    }
}

#[derive(Default)]
pub struct FakeModerator {
    flagged: Mutex<HashSet<String>>,
    fail: AtomicBool,
    checked: Mutex<Vec<String>>,
}

impl FakeModerator {
    pub fn flag(&self, text: &str) {
        self.flagged.lock().unwrap().insert(text.to_string());
    }

    pub fn fail_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Moderator for FakeModerator {
    async fn moderate(&self, text: &str, _user_id: &str) -> AiResult<ModerationVerdict> {
        self.checked.lock().unwrap().push(text.to_string());
        if text.is_empty() {
            return Ok(ModerationVerdict::Passed);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AiError::Http {
                provider: "openai",
                status: 500,
                body: "moderation down".to_string(),
            });
        }
        if self.flagged.lock().unwrap().contains(text) {
            return Ok(ModerationVerdict::Flagged {
                categories: vec!["harassment".to_string()],
            });
        }
        Ok(ModerationVerdict::Passed)
    }
}

/// `(avatar_url, script, voice_id)` of each synthesis call.
pub type SynthesisCall = (String, String, Option<String>);

#[derive(Default)]
pub struct FakeSynthesizer {
    calls: Mutex<Vec<SynthesisCall>>,
    failure: Mutex<Option<AiError>>,
}

impl FakeSynthesizer {
    pub fn calls(&self) -> Vec<SynthesisCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_with(&self, err: AiError) {
        *self.failure.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        avatar_url: &str,
        script: &str,
        voice_id: Option<&str>,
    ) -> AiResult<String> {
        self.calls.lock().unwrap().push((
            avatar_url.to_string(),
            script.to_string(),
            voice_id.map(str::to_string),
        ));
        take_failure(&self.failure)?;
        Ok(TALKING_HEAD_URL.to_string())
    }
}

/// `(talking_head_url, original_video_url, subtitles)` of each render.
pub type RenderCall = (String, Option<String>, String);

#[derive(Default)]
pub struct FakeCompositor {
    calls: Mutex<Vec<RenderCall>>,
}

impl FakeCompositor {
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compositor for FakeCompositor {
    async fn compose(
        &self,
        talking_head_url: &str,
        original_video_url: Option<&str>,
        subtitles: &str,
    ) -> AiResult<String> {
        self.calls.lock().unwrap().push((
            talking_head_url.to_string(),
            original_video_url.map(str::to_string),
            subtitles.to_string(),
        ));
        Ok(FINAL_URL.to_string())
    }
}

#[derive(Default)]
pub struct FakeVerifier {
    unreachable: AtomicBool,
}

impl FakeVerifier {
    pub fn never_reachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl UrlVerifier for FakeVerifier {
    async fn wait_until_reachable(&self, _url: &str) -> AiResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AiError::timeout("verify_url after 12 attempts"));
        }
        Ok(())
    }
}

/// Deps wired to in-memory stores and the fakes above, with handles kept
/// for assertions. User `u1` starts with two credits.
pub struct Harness {
    pub deps: PipelineDeps,
    pub status: Arc<InMemoryStatusStore>,
    pub profiles: Arc<InMemoryProfiles>,
    pub catalog: Arc<InMemoryCatalog>,
    pub summarizer: Arc<FakeSummarizer>,
    pub writer: Arc<FakeWriter>,
    pub moderator: Arc<FakeModerator>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub compositor: Arc<FakeCompositor>,
    pub verifier: Arc<FakeVerifier>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_urls(StaticObjectUrls::new("https://bucket.test")).await
    }

    pub async fn with_urls(urls: StaticObjectUrls) -> Self {
        let status = Arc::new(InMemoryStatusStore::new());
        let profiles = Arc::new(InMemoryProfiles::new().with_credits("u1", 2).await);
        let catalog = Arc::new(InMemoryCatalog::new());
        let summarizer = Arc::new(FakeSummarizer::default());
        let writer = Arc::new(FakeWriter::default());
        let moderator = Arc::new(FakeModerator::default());
        let synthesizer = Arc::new(FakeSynthesizer::default());
        let compositor = Arc::new(FakeCompositor::default());
        let verifier = Arc::new(FakeVerifier::default());

        let deps = PipelineDeps {
            status: status.clone(),
            urls: Arc::new(urls),
            credits: profiles.clone(),
            catalog: catalog.clone(),
            summarizer: summarizer.clone(),
            script_writer: writer.clone(),
            moderator: moderator.clone(),
            synthesizer: synthesizer.clone(),
            compositor: compositor.clone(),
            verifier: verifier.clone(),
            settings: PipelineSettings {
                script_max_chars: 1000,
                presign_expiry: Duration::from_secs(3600),
            },
        };

        Self {
            deps,
            status,
            profiles,
            catalog,
            summarizer,
            writer,
            moderator,
            synthesizer,
            compositor,
            verifier,
        }
    }

    pub async fn seed_queued(&self, job_id: &str, user_id: &str) {
        self.status
            .insert(
                job_id,
                StatusUpdate::transition(JobStatus::Queued, Stage::Queued).user_id(user_id),
            )
            .await;
    }

    /// A job the API has just handed to Phase 2.
    pub async fn seed_triggered(&self, job_id: &str, user_id: &str, video_s3_key: Option<&str>) {
        self.status
            .insert(
                job_id,
                StatusUpdate::transition(JobStatus::Processing, Stage::ContinuationTriggered)
                    .user_id(user_id)
                    .field(fields::GENERATED_SCRIPT, "Draft script")
                    .field(fields::AVATAR_S3_KEY, "uploads/avatars/u1/a.png")
                    .optional(fields::VIDEO_S3_KEY, video_s3_key)
                    .field(fields::THUMBNAIL_URL, "https://thumbs/v.jpg"),
            )
            .await;
    }

    pub async fn record(&self, job_id: &str) -> StatusRecord {
        self.status.get(job_id).await.unwrap()
    }

    pub async fn balance(&self, user_id: &str) -> i64 {
        use remerge_supabase::Credits;
        self.profiles.get_balance(user_id).await.unwrap()
    }
}
