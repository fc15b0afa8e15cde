//! Collaborators handed to the pipeline at startup.

use std::sync::Arc;
use std::time::Duration;

use remerge_ai_client::{
    Compositor, CreatomateClient, HttpUrlVerifier, LemonSliceClient, Moderator, OpenAiClient,
    ScriptWriter, Summarizer, Synthesizer, TwelveLabsClient, UrlVerifier,
};
use remerge_queue::{QueueConfig, RedisStatusStore, StatusStore};
use remerge_storage::{ObjectUrls, S3Client};
use remerge_supabase::{Catalog, Credits, ProfilesRepository, SupabaseClient, VideoCatalog};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Pipeline tuning taken from [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub script_max_chars: usize,
    pub presign_expiry: Duration,
}

impl From<&WorkerConfig> for PipelineSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            script_max_chars: config.script_max_chars,
            presign_expiry: config.presign_expiry,
        }
    }
}

/// Everything the phase handlers talk to.
#[derive(Clone)]
pub struct PipelineDeps {
    pub status: Arc<dyn StatusStore>,
    pub urls: Arc<dyn ObjectUrls>,
    pub credits: Arc<dyn Credits>,
    pub catalog: Arc<dyn Catalog>,
    pub summarizer: Arc<dyn Summarizer>,
    pub script_writer: Arc<dyn ScriptWriter>,
    pub moderator: Arc<dyn Moderator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub compositor: Arc<dyn Compositor>,
    pub verifier: Arc<dyn UrlVerifier>,
    pub settings: PipelineSettings,
}

impl PipelineDeps {
    /// Build production clients from the environment.
    pub async fn from_env(config: &WorkerConfig) -> WorkerResult<Self> {
        if config.script_max_chars == 0 {
            return Err(WorkerError::config_error(
                "WORKER_SCRIPT_MAX_CHARS must be positive",
            ));
        }

        let queue_config = QueueConfig::from_env();
        let status = RedisStatusStore::new(&queue_config.redis_url)?;
        let urls = S3Client::from_env().await?;

        let supabase = SupabaseClient::from_env()?;
        let credits = ProfilesRepository::new(supabase.clone());
        let catalog = VideoCatalog::new(supabase);

        let openai = Arc::new(OpenAiClient::from_env()?);
        let twelve_labs = TwelveLabsClient::from_env()?;
        let lemon_slice = LemonSliceClient::from_env()?;
        let creatomate = CreatomateClient::from_env()?;
        let verifier = HttpUrlVerifier::new()?;

        Ok(Self {
            status: Arc::new(status),
            urls: Arc::new(urls),
            credits: Arc::new(credits),
            catalog: Arc::new(catalog),
            summarizer: Arc::new(twelve_labs),
            script_writer: openai.clone(),
            moderator: openai,
            synthesizer: Arc::new(lemon_slice),
            compositor: Arc::new(creatomate),
            verifier: Arc::new(verifier),
            settings: PipelineSettings::from(config),
        })
    }
}
