//! Shared data models for the ReMerge backend.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers and the job status state machine
//! - Pipeline stage labels
//! - The text-valued job status record and partial updates
//! - Plan tiers and voice entitlements
//! - Upload kinds and generated-video catalog rows

pub mod job;
pub mod job_status;
pub mod plan;
pub mod stage;
pub mod status_record;
pub mod upload;
pub mod video;
pub mod voice;

// Re-export common types
pub use job::{JobId, FALLBACK_SCRIPT};
pub use job_status::{InvalidTransition, JobStatus};
pub use plan::PlanTier;
pub use stage::Stage;
pub use status_record::{fields, StatusRecord, StatusUpdate, JOB_STATUS_TTL_SECS};
pub use upload::{UploadKind, UploadRejection};
pub use video::{GeneratedVideo, NewVideoRecord, UpdateTitleRequest, DEFAULT_VIDEO_TITLE};
pub use voice::{VoiceTier, DEFAULT_VOICE_ID};
