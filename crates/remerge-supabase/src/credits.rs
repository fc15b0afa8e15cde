//! Profiles and credit balances.
//!
//! Credits live in the `profiles.credits` column. Deduction is an optimistic
//! conditional update (`credits=eq.{seen}`) retried a few times under
//! contention, so a balance can never drop below zero from this path.
//! Top-ups use the same conditional update in the other direction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use remerge_models::PlanTier;

use crate::client::{eq, SupabaseClient};
use crate::error::{SupabaseError, SupabaseResult};
use crate::metrics::record_credit_conflict;

/// Maximum attempts for an optimistic credit update.
const MAX_CREDIT_RETRIES: u32 = 5;

/// Base delay between optimistic update attempts (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Credits granted to a newly created profile.
pub const INITIAL_CREDITS: i64 = 1;

/// Balance some early free profiles were created with.
const LEGACY_FREE_CREDITS: i64 = 3;

const PROFILES: &str = "profiles";

/// A row of the `profiles` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub subscription_status: Option<String>,
    #[serde(default)]
    pub subscription_plan: Option<String>,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    #[serde(default)]
    pub stripe_subscription_id: Option<String>,
}

impl Profile {
    /// Effective plan; only an active subscription counts.
    pub fn plan(&self) -> PlanTier {
        PlanTier::from_subscription(
            self.subscription_status.as_deref(),
            self.subscription_plan.as_deref(),
        )
    }

    pub fn has_active_subscription(&self) -> bool {
        self.subscription_status.as_deref() == Some("active")
    }
}

/// Result of a deduction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductOutcome {
    /// The amount was taken; `remaining` is the new balance.
    Deducted { remaining: i64 },
    /// The balance was below the amount; nothing changed.
    Insufficient { balance: i64 },
}

impl DeductOutcome {
    pub fn is_deducted(&self) -> bool {
        matches!(self, DeductOutcome::Deducted { .. })
    }
}

/// Subscription purchased through a completed checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionGrant {
    pub plan: PlanTier,
    /// Credits added on top of the current balance
    pub credits: i64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

impl SubscriptionGrant {
    /// Columns written alongside the new balance.
    fn fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        fields.insert("subscription_status".into(), json!("active"));
        fields.insert("subscription_plan".into(), json!(self.plan.as_str()));
        if let Some(customer) = &self.stripe_customer_id {
            fields.insert("stripe_customer_id".into(), json!(customer));
        }
        if let Some(subscription) = &self.stripe_subscription_id {
            fields.insert("stripe_subscription_id".into(), json!(subscription));
        }
        fields
    }

    /// The profile already carries this subscription, so the grant was applied.
    fn already_applied_to(&self, profile: &Profile) -> bool {
        self.stripe_subscription_id.is_some()
            && profile.stripe_subscription_id == self.stripe_subscription_id
    }
}

/// Result of applying a [`SubscriptionGrant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted { balance: i64 },
    /// Same subscription seen before; nothing changed.
    AlreadyApplied,
    ProfileMissing,
}

/// Credit balance operations.
#[async_trait]
pub trait Credits: Send + Sync {
    /// Current balance; a user without a profile has zero.
    async fn get_balance(&self, user_id: &str) -> SupabaseResult<i64>;

    /// Atomically take `amount` if the balance covers it.
    async fn try_deduct(&self, user_id: &str, amount: i64) -> SupabaseResult<DeductOutcome>;

    /// Add `amount` to an existing profile's balance and return the new one.
    async fn add(&self, user_id: &str, amount: i64) -> SupabaseResult<i64>;
}

/// Profile lookups.
#[async_trait]
pub trait Profiles: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> SupabaseResult<Option<Profile>>;

    /// Create the profile with [`INITIAL_CREDITS`] if it does not exist.
    async fn ensure_profile(&self, user_id: &str) -> SupabaseResult<Profile>;

    /// Activate a subscription and add its credits in one write.
    ///
    /// A grant whose subscription id is already on the profile is skipped,
    /// so a redelivered checkout event does not credit twice.
    async fn grant_subscription(
        &self,
        user_id: &str,
        grant: &SubscriptionGrant,
    ) -> SupabaseResult<GrantOutcome>;
}

/// Supabase-backed profiles repository.
#[derive(Clone)]
pub struct ProfilesRepository {
    client: SupabaseClient,
}

impl ProfilesRepository {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    /// Conditionally raise the balance by `amount`, writing `fields` with it.
    ///
    /// `skip` is checked against each fresh read; returning true stops
    /// without a write. `None` means the profile does not exist.
    async fn increment(
        &self,
        user_id: &str,
        amount: i64,
        fields: serde_json::Map<String, serde_json::Value>,
        skip: impl Fn(&Profile) -> bool + Send + Sync,
    ) -> SupabaseResult<Option<IncrementOutcome>> {
        for attempt in 0..MAX_CREDIT_RETRIES {
            let Some(profile) = self.get_profile(user_id).await? else {
                return Ok(None);
            };
            if skip(&profile) {
                return Ok(Some(IncrementOutcome::Skipped));
            }

            let balance = profile.credits + amount;
            let mut body = fields.clone();
            body.insert("credits".into(), json!(balance));
            let rows: Vec<Profile> = self
                .client
                .update(
                    "add_credits",
                    PROFILES,
                    &[("id", eq(user_id)), ("credits", eq(profile.credits))],
                    &body,
                )
                .await?;

            if !rows.is_empty() {
                info!(user_id = %user_id, amount, balance, "Added credits");
                return Ok(Some(IncrementOutcome::Applied { balance }));
            }

            record_credit_conflict();
            debug!(
                user_id = %user_id,
                attempt = attempt + 1,
                "Credit top-up lost a race, retrying"
            );
            tokio::time::sleep(Duration::from_millis(
                RETRY_BASE_DELAY_MS * (attempt as u64 + 1),
            ))
            .await;
        }

        warn!(user_id = %user_id, "Credit top-up failed after {} attempts", MAX_CREDIT_RETRIES);
        Err(SupabaseError::conflict(format!(
            "credit balance for {} kept changing",
            user_id
        )))
    }
}

enum IncrementOutcome {
    Applied { balance: i64 },
    Skipped,
}

#[async_trait]
impl Profiles for ProfilesRepository {
    async fn get_profile(&self, user_id: &str) -> SupabaseResult<Option<Profile>> {
        let rows: Vec<Profile> = self
            .client
            .select(
                "get_profile",
                PROFILES,
                &[
                    (
                        "select",
                        "id,credits,subscription_status,subscription_plan,stripe_customer_id,stripe_subscription_id"
                            .to_string(),
                    ),
                    ("id", eq(user_id)),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn ensure_profile(&self, user_id: &str) -> SupabaseResult<Profile> {
        if let Some(profile) = self.get_profile(user_id).await? {
            // Early free accounts were seeded with 3 credits.
            let is_free = matches!(profile.subscription_status.as_deref(), None | Some("free"));
            if profile.credits == LEGACY_FREE_CREDITS && is_free {
                info!(user_id = %user_id, "Resetting legacy free credit balance");
                let rows: Vec<Profile> = self
                    .client
                    .update(
                        "reset_legacy_credits",
                        PROFILES,
                        &[("id", eq(user_id)), ("credits", eq(LEGACY_FREE_CREDITS))],
                        &json!({ "credits": INITIAL_CREDITS }),
                    )
                    .await?;
                return Ok(rows.into_iter().next().unwrap_or(profile));
            }
            debug!(user_id = %user_id, "Profile already exists");
            return Ok(profile);
        }

        info!(user_id = %user_id, credits = INITIAL_CREDITS, "Creating profile");
        let inserted: Vec<Profile> = self
            .client
            .insert(
                "create_profile",
                PROFILES,
                &json!({
                    "id": user_id,
                    "credits": INITIAL_CREDITS,
                    "subscription_status": "free",
                }),
                Some("resolution=ignore-duplicates"),
            )
            .await?;

        match inserted.into_iter().next() {
            Some(profile) => Ok(profile),
            // A concurrent callback created it first.
            None => self
                .get_profile(user_id)
                .await?
                .ok_or_else(|| SupabaseError::not_found(format!("profile {}", user_id))),
        }
    }

    async fn grant_subscription(
        &self,
        user_id: &str,
        grant: &SubscriptionGrant,
    ) -> SupabaseResult<GrantOutcome> {
        let outcome = self
            .increment(user_id, grant.credits, grant.fields(), |profile| {
                grant.already_applied_to(profile)
            })
            .await?;
        Ok(match outcome {
            Some(IncrementOutcome::Applied { balance }) => {
                info!(user_id = %user_id, plan = %grant.plan, balance, "Subscription activated");
                GrantOutcome::Granted { balance }
            }
            Some(IncrementOutcome::Skipped) => {
                info!(user_id = %user_id, "Subscription already applied");
                GrantOutcome::AlreadyApplied
            }
            None => GrantOutcome::ProfileMissing,
        })
    }
}

#[async_trait]
impl Credits for ProfilesRepository {
    async fn get_balance(&self, user_id: &str) -> SupabaseResult<i64> {
        let rows: Vec<Profile> = self
            .client
            .select(
                "get_balance",
                PROFILES,
                &[("select", "id,credits".to_string()), ("id", eq(user_id))],
            )
            .await?;
        match rows.first() {
            Some(profile) => Ok(profile.credits),
            None => {
                warn!(user_id = %user_id, "Profile not found for credit check");
                Ok(0)
            }
        }
    }

    async fn try_deduct(&self, user_id: &str, amount: i64) -> SupabaseResult<DeductOutcome> {
        for attempt in 0..MAX_CREDIT_RETRIES {
            let balance = self.get_balance(user_id).await?;
            if balance < amount || balance <= 0 {
                info!(user_id = %user_id, balance, amount, "Insufficient credits");
                return Ok(DeductOutcome::Insufficient { balance });
            }

            let remaining = balance - amount;
            let rows: Vec<Profile> = self
                .client
                .update(
                    "deduct_credits",
                    PROFILES,
                    &[("id", eq(user_id)), ("credits", eq(balance))],
                    &json!({ "credits": remaining }),
                )
                .await?;

            if !rows.is_empty() {
                info!(user_id = %user_id, amount, remaining, "Deducted credits");
                return Ok(DeductOutcome::Deducted { remaining });
            }

            // Balance moved between read and write.
            record_credit_conflict();
            debug!(
                user_id = %user_id,
                attempt = attempt + 1,
                "Credit update lost a race, retrying"
            );
            tokio::time::sleep(Duration::from_millis(
                RETRY_BASE_DELAY_MS * (attempt as u64 + 1),
            ))
            .await;
        }

        warn!(user_id = %user_id, "Credit deduction failed after {} attempts", MAX_CREDIT_RETRIES);
        Err(SupabaseError::conflict(format!(
            "credit balance for {} kept changing",
            user_id
        )))
    }

    async fn add(&self, user_id: &str, amount: i64) -> SupabaseResult<i64> {
        match self
            .increment(user_id, amount, serde_json::Map::new(), |_| false)
            .await?
        {
            Some(IncrementOutcome::Applied { balance }) => Ok(balance),
            _ => Err(SupabaseError::not_found(format!("profile {}", user_id))),
        }
    }
}
