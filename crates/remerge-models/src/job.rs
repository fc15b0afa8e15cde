//! Job identifiers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Script used when a job has an avatar but no source video.
pub const FALLBACK_SCRIPT: &str =
    "Hello from ReMerge AI! This video was generated using just an avatar.";

/// Unique identifier for a job.
///
/// Generated at submission and stable across both pipeline phases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that an externally supplied ID looks like one we issued.
    ///
    /// Accepts UUIDs and Redis stream IDs (`<ms>-<seq>`), the latter being
    /// the fallback key for legacy messages without a job ID.
    pub fn is_well_formed(s: &str) -> bool {
        if s.is_empty() || s.len() > 64 {
            return false;
        }
        if Uuid::parse_str(s).is_ok() {
            return true;
        }
        match s.split_once('-') {
            Some((ms, seq)) => {
                !ms.is_empty()
                    && !seq.is_empty()
                    && ms.chars().all(|c| c.is_ascii_digit())
                    && seq.chars().all(|c| c.is_ascii_digit())
            }
            None => false,
        }
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
