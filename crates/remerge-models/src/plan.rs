//! Subscription plans.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Plan tier enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Creator,
    Pro,
    Growth,
}

impl PlanTier {
    /// Parse from string (case-insensitive). Unknown plans are treated as free.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "creator" => PlanTier::Creator,
            "pro" => PlanTier::Pro,
            "growth" => PlanTier::Growth,
            _ => PlanTier::Free,
        }
    }

    /// Resolve the effective plan from a profile's subscription columns.
    ///
    /// Only an `active` subscription unlocks its plan.
    pub fn from_subscription(status: Option<&str>, plan: Option<&str>) -> Self {
        match (status, plan) {
            (Some(s), Some(p)) if s.eq_ignore_ascii_case("active") => PlanTier::parse(p),
            _ => PlanTier::Free,
        }
    }

    /// Credits granted when the plan is purchased.
    pub fn checkout_credits(&self) -> i64 {
        match self {
            PlanTier::Free => 0,
            PlanTier::Creator => 10,
            PlanTier::Pro => 30,
            PlanTier::Growth => 90,
        }
    }

    /// Get the plan name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Creator => "creator",
            PlanTier::Pro => "pro",
            PlanTier::Growth => "growth",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_credits_grow_with_plan() {
        assert_eq!(PlanTier::Free.checkout_credits(), 0);
        assert_eq!(PlanTier::Creator.checkout_credits(), 10);
        assert_eq!(PlanTier::Pro.checkout_credits(), 30);
        assert_eq!(PlanTier::Growth.checkout_credits(), 90);
    }

    #[test]
    fn test_plan_names_are_case_insensitive() {
        assert_eq!(PlanTier::parse("Creator"), PlanTier::Creator);
        assert_eq!(PlanTier::parse("GROWTH"), PlanTier::Growth);
        assert_eq!(PlanTier::parse("ErrorFetchingPlan"), PlanTier::Free);
    }

    #[test]
    fn test_inactive_subscription_is_free() {
        assert_eq!(
            PlanTier::from_subscription(Some("canceled"), Some("Pro")),
            PlanTier::Free
        );
        assert_eq!(
            PlanTier::from_subscription(Some("active"), Some("Pro")),
            PlanTier::Pro
        );
        assert_eq!(PlanTier::from_subscription(None, None), PlanTier::Free);
    }
}
