//! Application state.

use std::sync::Arc;

use remerge_ai_client::{OpenAiClient, ScriptWriter};
use remerge_queue::{JobQueue, MessageQueue, QueueConfig, RedisStatusStore, StatusStore};
use remerge_storage::{ObjectUrls, S3Client};
use remerge_supabase::{
    Catalog, Credits, Profiles, ProfilesRepository, SupabaseClient, VideoCatalog,
};

use crate::auth::JwtVerifier;
use crate::config::ApiConfig;

/// Shared application state.
///
/// Every backend sits behind its trait so the router can be exercised
/// against the in-memory implementations.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: Arc<dyn MessageQueue>,
    pub status: Arc<dyn StatusStore>,
    pub urls: Arc<dyn ObjectUrls>,
    pub credits: Arc<dyn Credits>,
    pub profiles: Arc<dyn Profiles>,
    pub catalog: Arc<dyn Catalog>,
    pub script_writer: Arc<dyn ScriptWriter>,
    pub jwt: Arc<JwtVerifier>,
}

impl AppState {
    /// Create application state from the environment.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let queue_config = QueueConfig::from_env();
        let status = RedisStatusStore::new(&queue_config.redis_url)?;
        let queue = JobQueue::new(queue_config)?;

        let urls = S3Client::from_env().await?;

        let supabase = SupabaseClient::from_env()?;
        let profiles = Arc::new(ProfilesRepository::new(supabase.clone()));
        let catalog = VideoCatalog::new(supabase);

        let script_writer = OpenAiClient::from_env()?;
        let jwt = JwtVerifier::from_env()?;

        Ok(Self {
            config,
            queue: Arc::new(queue),
            status: Arc::new(status),
            urls: Arc::new(urls),
            credits: profiles.clone(),
            profiles,
            catalog: Arc::new(catalog),
            script_writer: Arc::new(script_writer),
            jwt: Arc::new(jwt),
        })
    }
}
