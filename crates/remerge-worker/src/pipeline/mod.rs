//! The two job phases and the helpers they share.
//!
//! Phase 1 ("new") turns an avatar and optional video into a reviewed
//! script and suspends at `pending_review`. Phase 2 ("continue") charges a
//! credit and produces the final video. Handlers never return errors to the
//! dispatch loop: every failure becomes a `failed` status record.

pub mod phase1;
pub mod phase2;

#[cfg(test)]
pub(crate) mod fakes;

use remerge_ai_client::{ModerationVerdict, Moderator};
use remerge_models::StatusUpdate;
use remerge_queue::StatusStore;
use tracing::{error, warn};

pub use phase1::run_new_job;
pub use phase2::run_continue_job;

/// How a phase handler left the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Phase 1 stored a script and is waiting for review.
    AwaitingReview,
    /// Phase 2 rendered and verified the final video.
    Completed { final_url: String },
    /// The job was marked failed.
    Failed { reason: String },
    /// The message did not apply to the job's current state.
    Skipped { reason: String },
}

/// Best-effort status write. Store failures are logged, never propagated.
pub(crate) async fn record(status: &dyn StatusStore, job_id: &str, update: StatusUpdate) {
    if let Err(e) = status.set_fields(job_id, &update).await {
        error!(job_id = %job_id, "Failed to update job status: {}", e);
    }
}

/// Moderation with a fail-safe: a provider error counts as flagged.
pub(crate) async fn passes_moderation(moderator: &dyn Moderator, text: &str, user_id: &str) -> bool {
    match moderator.moderate(text, user_id).await {
        Ok(ModerationVerdict::Passed) => true,
        Ok(ModerationVerdict::Flagged { .. }) => false,
        Err(e) => {
            error!(user_id = %user_id, "Moderation call failed, treating text as flagged: {}", e);
            false
        }
    }
}

/// Cut `script` to at most `max_chars` characters.
pub(crate) fn truncate_script(script: &str, max_chars: usize, job_id: &str) -> String {
    let total = script.chars().count();
    if total <= max_chars {
        return script.to_string();
    }
    warn!(
        job_id = %job_id,
        original_chars = total,
        max_chars,
        "Script exceeds lip-sync limit, truncating"
    );
    script.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate_script("héllo", 10, "j"), "héllo");
        assert_eq!(truncate_script("héllo", 2, "j"), "hé");
        let long = "a".repeat(1500);
        assert_eq!(truncate_script(&long, 1000, "j").len(), 1000);
    }
}
