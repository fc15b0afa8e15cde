//! In-memory profiles and catalog for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use remerge_models::{GeneratedVideo, NewVideoRecord};

use crate::catalog::{Catalog, LIST_LIMIT};
use crate::credits::{
    Credits, DeductOutcome, GrantOutcome, Profile, Profiles, SubscriptionGrant, INITIAL_CREDITS,
};
use crate::error::{SupabaseError, SupabaseResult};

/// Profiles and balances held in memory.
#[derive(Default)]
pub struct InMemoryProfiles {
    profiles: Mutex<HashMap<String, Profile>>,
    deductions: AtomicU64,
    fail: AtomicBool,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a free profile with `credits`.
    pub async fn with_credits(self, user_id: &str, credits: i64) -> Self {
        self.put(Profile {
            id: user_id.to_string(),
            credits,
            subscription_status: Some("free".to_string()),
            ..Profile::default()
        })
        .await;
        self
    }

    pub async fn put(&self, profile: Profile) {
        self.profiles
            .lock()
            .await
            .insert(profile.id.clone(), profile);
    }

    /// Number of successful deductions so far.
    pub fn deductions(&self) -> u64 {
        self.deductions.load(Ordering::SeqCst)
    }

    /// Make every call fail with a server error.
    pub fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> SupabaseResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(SupabaseError::ServerError(503, "unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Credits for InMemoryProfiles {
    async fn get_balance(&self, user_id: &str) -> SupabaseResult<i64> {
        self.check()?;
        Ok(self
            .profiles
            .lock()
            .await
            .get(user_id)
            .map(|p| p.credits)
            .unwrap_or(0))
    }

    async fn try_deduct(&self, user_id: &str, amount: i64) -> SupabaseResult<DeductOutcome> {
        self.check()?;
        let mut profiles = self.profiles.lock().await;
        let Some(profile) = profiles.get_mut(user_id) else {
            return Ok(DeductOutcome::Insufficient { balance: 0 });
        };
        if profile.credits < amount || profile.credits <= 0 {
            return Ok(DeductOutcome::Insufficient {
                balance: profile.credits,
            });
        }
        profile.credits -= amount;
        self.deductions.fetch_add(1, Ordering::SeqCst);
        Ok(DeductOutcome::Deducted {
            remaining: profile.credits,
        })
    }

    async fn add(&self, user_id: &str, amount: i64) -> SupabaseResult<i64> {
        self.check()?;
        let mut profiles = self.profiles.lock().await;
        let profile = profiles
            .get_mut(user_id)
            .ok_or_else(|| SupabaseError::not_found(format!("profile {}", user_id)))?;
        profile.credits += amount;
        Ok(profile.credits)
    }
}

#[async_trait]
impl Profiles for InMemoryProfiles {
    async fn get_profile(&self, user_id: &str) -> SupabaseResult<Option<Profile>> {
        self.check()?;
        Ok(self.profiles.lock().await.get(user_id).cloned())
    }

    async fn ensure_profile(&self, user_id: &str) -> SupabaseResult<Profile> {
        self.check()?;
        let mut profiles = self.profiles.lock().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile {
                id: user_id.to_string(),
                credits: INITIAL_CREDITS,
                subscription_status: Some("free".to_string()),
                ..Profile::default()
            });
        Ok(profile.clone())
    }

    async fn grant_subscription(
        &self,
        user_id: &str,
        grant: &SubscriptionGrant,
    ) -> SupabaseResult<GrantOutcome> {
        self.check()?;
        let mut profiles = self.profiles.lock().await;
        let Some(profile) = profiles.get_mut(user_id) else {
            return Ok(GrantOutcome::ProfileMissing);
        };
        if grant.stripe_subscription_id.is_some()
            && profile.stripe_subscription_id == grant.stripe_subscription_id
        {
            return Ok(GrantOutcome::AlreadyApplied);
        }
        profile.credits += grant.credits;
        profile.subscription_status = Some("active".to_string());
        profile.subscription_plan = Some(grant.plan.as_str().to_string());
        if grant.stripe_customer_id.is_some() {
            profile.stripe_customer_id = grant.stripe_customer_id.clone();
        }
        if grant.stripe_subscription_id.is_some() {
            profile.stripe_subscription_id = grant.stripe_subscription_id.clone();
        }
        Ok(GrantOutcome::Granted {
            balance: profile.credits,
        })
    }
}

/// Catalog held in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    rows: Mutex<Vec<(String, String, NewVideoRecord)>>,
    seq: AtomicU64,
    fail: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every inserted record, oldest first.
    pub async fn records(&self) -> Vec<NewVideoRecord> {
        self.rows
            .lock()
            .await
            .iter()
            .map(|(_, _, r)| r.clone())
            .collect()
    }

    /// Make every call fail with a server error.
    pub fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> SupabaseResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(SupabaseError::ServerError(503, "unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn insert_record(&self, record: &NewVideoRecord) -> SupabaseResult<()> {
        self.check()?;
        let id = format!("video-{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1);
        let created_at = chrono::Utc::now().to_rfc3339();
        self.rows.lock().await.push((id, created_at, record.clone()));
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> SupabaseResult<Vec<GeneratedVideo>> {
        self.check()?;
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .rev()
            .filter(|(_, _, r)| r.user_id == user_id)
            .take(LIST_LIMIT)
            .map(|(id, created_at, r)| GeneratedVideo {
                id: id.clone(),
                created_at: created_at.clone(),
                title: Some(r.title.clone()),
                video_url: r.video_url.clone(),
                thumbnail_url: r.thumbnail_url.clone(),
            })
            .collect())
    }

    async fn update_title(
        &self,
        user_id: &str,
        video_id: &str,
        title: &str,
    ) -> SupabaseResult<bool> {
        self.check()?;
        let mut rows = self.rows.lock().await;
        match rows
            .iter_mut()
            .find(|(id, _, r)| id == video_id && r.user_id == user_id)
        {
            Some((_, _, record)) => {
                record.title = title.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
