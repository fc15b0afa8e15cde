//! Queue message types.
//!
//! Each stream entry carries two text fields: `job_type` (`new` or
//! `continue`, may be absent on legacy producers) and `job_data`, a JSON
//! document whose shape depends on the job type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{QueueError, QueueResult};

/// Stream entry field carrying the job type tag.
pub const JOB_TYPE_FIELD: &str = "job_type";
/// Stream entry field carrying the JSON payload.
pub const JOB_DATA_FIELD: &str = "job_data";

/// Job type discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobType {
    /// Phase 1: summarize, write and moderate a script.
    New,
    /// Phase 2: synthesize, render and verify the final video.
    Continue,
    /// Missing or unrecognized tag. Dispatched as [`JobType::New`].
    Unknown(Option<String>),
}

impl JobType {
    /// Parse the wire tag.
    pub fn from_wire(tag: Option<&str>) -> Self {
        match tag {
            Some("new") => JobType::New,
            Some("continue") => JobType::Continue,
            other => JobType::Unknown(other.map(str::to_string)),
        }
    }

    /// Wire tag written by producers.
    pub fn as_wire(&self) -> Option<&str> {
        match self {
            JobType::New => Some("new"),
            JobType::Continue => Some("continue"),
            JobType::Unknown(tag) => tag.as_deref(),
        }
    }

    /// Resolve the phase to run, logging when the legacy fallback is used.
    pub fn resolve(&self, message_id: &str) -> JobType {
        match self {
            JobType::Unknown(tag) => {
                warn!(
                    message_id = %message_id,
                    job_type = ?tag,
                    "Unrecognized job_type, treating message as a new job"
                );
                JobType::New
            }
            known => known.clone(),
        }
    }
}

/// Payload of a "new" job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJobData {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub avatar_s3_key: Option<String>,
    #[serde(default)]
    pub video_s3_key: Option<String>,
    #[serde(default)]
    pub manual_script_mode: bool,
}

/// Payload of a "continue" job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueJobData {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
}

/// A message to append to the job stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobMessage {
    New(NewJobData),
    Continue(ContinueJobData),
}

impl JobMessage {
    pub fn job_type(&self) -> JobType {
        match self {
            JobMessage::New(_) => JobType::New,
            JobMessage::Continue(_) => JobType::Continue,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobMessage::New(data) => data.job_id.as_deref(),
            JobMessage::Continue(data) => data.job_id.as_deref(),
        }
    }

    /// Field/value pairs for `XADD`.
    pub fn to_fields(&self) -> QueueResult<Vec<(&'static str, String)>> {
        let payload = match self {
            JobMessage::New(data) => serde_json::to_string(data)?,
            JobMessage::Continue(data) => serde_json::to_string(data)?,
        };
        let tag = match self {
            JobMessage::New(_) => "new",
            JobMessage::Continue(_) => "continue",
        };
        Ok(vec![(JOB_TYPE_FIELD, tag.to_string()), (JOB_DATA_FIELD, payload)])
    }
}

/// An entry read from the job stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Stream message id (`<ms>-<seq>`).
    pub id: String,
    pub job_type: JobType,
    /// Raw JSON payload, if the entry had one.
    pub job_data: Option<String>,
}

impl StreamEntry {
    /// Build an entry from decoded text fields.
    pub fn from_fields(id: impl Into<String>, fields: &HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            job_type: JobType::from_wire(fields.get(JOB_TYPE_FIELD).map(String::as_str)),
            job_data: fields
                .get(JOB_DATA_FIELD)
                .filter(|d| !d.is_empty())
                .cloned(),
        }
    }

    pub fn decode_new(&self) -> QueueResult<NewJobData> {
        self.decode()
    }

    pub fn decode_continue(&self) -> QueueResult<ContinueJobData> {
        self.decode()
    }

    fn decode<T: serde::de::DeserializeOwned>(&self) -> QueueResult<T> {
        let raw = self
            .job_data
            .as_deref()
            .ok_or_else(|| QueueError::malformed(&self.id, "missing job_data"))?;
        serde_json::from_str(raw).map_err(|e| QueueError::malformed(&self.id, e.to_string()))
    }
}
