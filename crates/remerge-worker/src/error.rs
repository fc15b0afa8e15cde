//! Worker error types.
//!
//! The `Display` text of a pipeline error is what ends up in a failed
//! job's `error_message`, so messages are written for the job owner.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    InvalidJob(String),

    #[error("{0}")]
    ModerationRejected(String),

    #[error("Insufficient credits (balance {balance})")]
    InsufficientCredits { balance: i64 },

    #[error("{0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] remerge_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] remerge_storage::StorageError),

    #[error("Supabase error: {0}")]
    Supabase(#[from] remerge_supabase::SupabaseError),

    #[error("{0}")]
    Ai(#[from] remerge_ai_client::AiError),
}

impl WorkerError {
    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn moderation_rejected(msg: impl Into<String>) -> Self {
        Self::ModerationRejected(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::InvalidJob(_) => "invalid_job",
            WorkerError::ModerationRejected(_) => "moderation",
            WorkerError::InsufficientCredits { .. } => "insufficient_credits",
            WorkerError::JobFailed(_) => "job_failed",
            WorkerError::ConfigError(_) => "config",
            WorkerError::Queue(_) => "queue",
            WorkerError::Storage(_) => "storage",
            WorkerError::Supabase(_) => "supabase",
            WorkerError::Ai(_) => "provider",
        }
    }
}
