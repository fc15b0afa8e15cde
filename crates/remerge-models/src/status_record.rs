//! Job status record.
//!
//! The record is a flat, text-valued map so it can live in a Redis hash.
//! Writers send partial updates that are merged into the stored record;
//! optional values are written as `""` and readers treat `""` as absent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::job_status::JobStatus;
use crate::stage::Stage;

/// Retention window for status records, refreshed on every write.
pub const JOB_STATUS_TTL_SECS: u64 = 24 * 60 * 60;

/// Field names used in the status record.
pub mod fields {
    pub const STATUS: &str = "status";
    pub const STAGE: &str = "stage";
    pub const USER_ID: &str = "user_id";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const GENERATED_SCRIPT: &str = "generated_script";
    pub const AVATAR_S3_KEY: &str = "avatar_s3_key";
    pub const VIDEO_S3_KEY: &str = "video_s3_key";
    pub const THUMBNAIL_URL: &str = "thumbnail_url";
    pub const SUMMARY: &str = "summary";
    pub const FINAL_URL: &str = "final_url";
}

/// Snapshot of a job's status record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusRecord {
    fields: HashMap<String, String>,
}

impl StatusRecord {
    pub fn from_fields(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    /// Get a field, treating the empty marker as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Get a field including empty values.
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.get(fields::STATUS).and_then(JobStatus::parse)
    }

    pub fn stage(&self) -> Option<Stage> {
        self.get(fields::STAGE).and_then(Stage::parse)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.get(fields::USER_ID)
    }

    pub fn avatar_s3_key(&self) -> Option<&str> {
        self.get(fields::AVATAR_S3_KEY)
    }

    pub fn video_s3_key(&self) -> Option<&str> {
        self.get(fields::VIDEO_S3_KEY)
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.get(fields::THUMBNAIL_URL)
    }

    pub fn generated_script(&self) -> Option<&str> {
        self.get_raw(fields::GENERATED_SCRIPT)
    }

    pub fn final_url(&self) -> Option<&str> {
        self.get(fields::FINAL_URL)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.get(fields::ERROR_MESSAGE)
    }

    /// True if the record is owned by `user_id`.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id() == Some(user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Merge a partial update into this snapshot.
    pub fn apply(&mut self, update: &StatusUpdate) {
        for (name, value) in update.pairs() {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.fields
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.fields
    }
}

/// Partial update to a status record.
///
/// Only the fields set on the builder are written; everything else in the
/// stored record is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pairs: Vec<(String, String)>,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update that only changes the stage.
    pub fn stage_only(stage: Stage) -> Self {
        Self::new().stage(stage)
    }

    /// Update that moves the job to `status` at `stage`.
    pub fn transition(status: JobStatus, stage: Stage) -> Self {
        Self::new().status(status).stage(stage)
    }

    /// Terminal failure update.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new()
            .status(JobStatus::Failed)
            .stage(Stage::Error)
            .field(fields::ERROR_MESSAGE, message)
    }

    pub fn status(self, status: JobStatus) -> Self {
        self.field(fields::STATUS, status.as_str())
    }

    pub fn stage(self, stage: Stage) -> Self {
        self.field(fields::STAGE, stage.as_str())
    }

    pub fn user_id(self, user_id: impl Into<String>) -> Self {
        self.field(fields::USER_ID, user_id)
    }

    /// Attach the owner if known; an unknown owner leaves the field alone.
    pub fn maybe_user_id(self, user_id: Option<&str>) -> Self {
        match user_id {
            Some(uid) if !uid.is_empty() => self.user_id(uid),
            _ => self,
        }
    }

    /// Set a field, replacing an earlier value for the same name.
    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.pairs.iter_mut().find(|(n, _)| n == name) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((name.to_string(), value)),
        }
        self
    }

    /// Set an optional field, writing the empty marker for `None`.
    pub fn optional(self, name: &str, value: Option<&str>) -> Self {
        self.field(name, value.unwrap_or_default())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Status carried by this update, if any.
    pub fn status_value(&self) -> Option<JobStatus> {
        self.get(fields::STATUS).and_then(JobStatus::parse)
    }

    /// Stage carried by this update, if any.
    pub fn stage_value(&self) -> Option<Stage> {
        self.get(fields::STAGE).and_then(Stage::parse)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
