//! Worker metrics.

use metrics::{counter, histogram};

pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "remerge_worker_jobs_started_total";
    pub const JOBS_SUSPENDED_TOTAL: &str = "remerge_worker_jobs_suspended_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "remerge_worker_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "remerge_worker_jobs_failed_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "remerge_worker_jobs_skipped_total";
    pub const MALFORMED_MESSAGES_TOTAL: &str = "remerge_worker_malformed_messages_total";
    pub const RECLAIMED_MESSAGES_TOTAL: &str = "remerge_worker_reclaimed_messages_total";
    pub const PHASE_DURATION_SECONDS: &str = "remerge_worker_phase_duration_seconds";
}

pub fn record_job_started(phase: &'static str) {
    counter!(names::JOBS_STARTED_TOTAL, "phase" => phase).increment(1);
}

/// Phase 1 reached the review gate.
pub fn record_job_suspended() {
    counter!(names::JOBS_SUSPENDED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(phase: &'static str, kind: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "phase" => phase, "kind" => kind).increment(1);
}

pub fn record_job_skipped(phase: &'static str) {
    counter!(names::JOBS_SKIPPED_TOTAL, "phase" => phase).increment(1);
}

pub fn record_malformed_message() {
    counter!(names::MALFORMED_MESSAGES_TOTAL).increment(1);
}

/// Entries taken over from a consumer that stopped acknowledging.
pub fn record_reclaimed_messages(count: usize) {
    counter!(names::RECLAIMED_MESSAGES_TOTAL).increment(count as u64);
}

pub fn record_phase_duration(phase: &'static str, duration_secs: f64) {
    histogram!(names::PHASE_DURATION_SECONDS, "phase" => phase).record(duration_secs);
}
