//! Stripe webhook verification and checkout events.
//!
//! Stripe signs each delivery with `Stripe-Signature: t=<unix>,v1=<hex>`,
//! where `v1` is HMAC-SHA256 over `"{t}.{raw body}"` keyed by the endpoint
//! secret. Several `v1` entries may be present while a secret is rolled.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use remerge_models::PlanTier;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Webhook secret and the price ids of each paid plan.
#[derive(Clone, Default)]
pub struct StripeConfig {
    pub webhook_secret: Option<String>,
    pub price_creator: Option<String>,
    pub price_pro: Option<String>,
    pub price_growth: Option<String>,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "***"))
            .field("price_creator", &self.price_creator)
            .field("price_pro", &self.price_pro)
            .field("price_growth", &self.price_growth)
            .finish()
    }
}

impl StripeConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
            price_creator: var("STRIPE_PRICE_ID_CREATOR"),
            price_pro: var("STRIPE_PRICE_ID_PRO"),
            price_growth: var("STRIPE_PRICE_ID_GROWTH"),
        }
    }

    /// Plan sold under `price_id`, if it is one of ours.
    pub fn plan_for_price(&self, price_id: &str) -> Option<PlanTier> {
        [
            (&self.price_creator, PlanTier::Creator),
            (&self.price_pro, PlanTier::Pro),
            (&self.price_growth, PlanTier::Growth),
        ]
        .into_iter()
        .find(|(configured, _)| configured.as_deref() == Some(price_id))
        .map(|(_, plan)| plan)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("timestamp outside the tolerance window")]
    Expired,
    #[error("no signature matches the payload")]
    Mismatch,
}

/// Check a `Stripe-Signature` header against the raw request body.
pub fn verify_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    let mac = signed_mac(payload, secret, timestamp).ok_or(SignatureError::Mismatch)?;
    let matched = signatures
        .into_iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn signed_mac(payload: &[u8], secret: &str, timestamp: i64) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(mac)
}

/// Header value Stripe would send for `payload` signed at `timestamp`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Option<String> {
    let mac = signed_mac(payload, secret, timestamp)?;
    Some(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[derive(Debug, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// The fields of a Checkout Session the webhook reads.
#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Our user id, set when the session was created
    pub client_reference_id: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub line_items: Option<LineItems>,
}

#[derive(Debug, Deserialize)]
pub struct LineItems {
    #[serde(default)]
    pub data: Vec<LineItem>,
}

#[derive(Debug, Deserialize)]
pub struct LineItem {
    pub price: Option<Price>,
}

#[derive(Debug, Deserialize)]
pub struct Price {
    pub id: String,
}

impl CheckoutSession {
    /// Price purchased: the first expanded line item, else `metadata.price_id`.
    pub fn price_id(&self) -> Option<&str> {
        self.line_items
            .as_ref()
            .and_then(|items| items.data.first())
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
            .or_else(|| self.metadata.get("price_id").map(String::as_str))
    }
}
