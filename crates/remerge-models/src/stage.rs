//! Fine-grained pipeline stage labels stored alongside the job status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sub-step label within a job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Written by the submission API
    Queued,
    // Phase 1
    Starting,
    Summarizing,
    GeneratingScript,
    ModeratingInitialScript,
    ScriptReadyForReview,
    // Continuation gate (written by the API)
    ContinuationTriggered,
    // Phase 2
    ChargingCredits,
    ModeratingFinalScript,
    LipSyncing,
    RenderingFinal,
    VerifyingUrl,
    Done,
    /// Any failure
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Starting => "starting",
            Stage::Summarizing => "summarizing",
            Stage::GeneratingScript => "generating_script",
            Stage::ModeratingInitialScript => "moderating_initial_script",
            Stage::ScriptReadyForReview => "script_ready_for_review",
            Stage::ContinuationTriggered => "continuation_triggered",
            Stage::ChargingCredits => "charging_credits",
            Stage::ModeratingFinalScript => "moderating_final_script",
            Stage::LipSyncing => "lip_syncing",
            Stage::RenderingFinal => "rendering_final",
            Stage::VerifyingUrl => "verifying_url",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let stage = match s {
            "queued" => Stage::Queued,
            "starting" => Stage::Starting,
            "summarizing" => Stage::Summarizing,
            "generating_script" => Stage::GeneratingScript,
            "moderating_initial_script" => Stage::ModeratingInitialScript,
            "script_ready_for_review" => Stage::ScriptReadyForReview,
            "continuation_triggered" => Stage::ContinuationTriggered,
            "charging_credits" => Stage::ChargingCredits,
            "moderating_final_script" => Stage::ModeratingFinalScript,
            "lip_syncing" => Stage::LipSyncing,
            "rendering_final" => Stage::RenderingFinal,
            "verifying_url" => Stage::VerifyingUrl,
            "done" => Stage::Done,
            "error" => Stage::Error,
            _ => return None,
        };
        Some(stage)
    }

    /// True for the `processing` sub-steps of Phase 1.
    ///
    /// A redelivered "new" message may only resume a job whose record is
    /// still in one of these (or queued).
    pub fn is_initial_phase(&self) -> bool {
        matches!(
            self,
            Stage::Queued
                | Stage::Starting
                | Stage::Summarizing
                | Stage::GeneratingScript
                | Stage::ModeratingInitialScript
        )
    }

    /// True for the `processing` sub-steps a Phase 2 worker writes after
    /// claiming the job.
    pub fn is_render_phase(&self) -> bool {
        matches!(
            self,
            Stage::ChargingCredits
                | Stage::ModeratingFinalScript
                | Stage::LipSyncing
                | Stage::RenderingFinal
                | Stage::VerifyingUrl
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
