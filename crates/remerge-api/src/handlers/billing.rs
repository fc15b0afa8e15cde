//! Stripe webhook: completed checkouts top up credits.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use tracing::{error, info, warn};

use remerge_supabase::{GrantOutcome, SubscriptionGrant};

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_stripe_event;
use crate::state::AppState;
use crate::stripe::{verify_signature, CheckoutSession, Event, CHECKOUT_COMPLETED};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

const ACK: WebhookAck = WebhookAck { received: true };

/// Receive a Stripe event.
///
/// Unknown events and sessions that cannot be attributed are acknowledged
/// so Stripe stops resending them. Storage failures return 500 so it does.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing Stripe-Signature header"))?;
    let Some(secret) = state.config.stripe.webhook_secret.as_deref() else {
        error!("STRIPE_WEBHOOK_SECRET is not configured");
        return Err(ApiError::internal("Webhook secret not configured"));
    };

    if let Err(e) = verify_signature(signature, &body, secret, chrono::Utc::now().timestamp()) {
        warn!("Rejected Stripe webhook: {}", e);
        return Err(ApiError::bad_request("Invalid signature"));
    }
    let event: Event = serde_json::from_slice(&body).map_err(|e| {
        warn!("Unparseable Stripe event: {}", e);
        ApiError::bad_request("Invalid payload")
    })?;

    info!(event_id = %event.id, event_type = %event.kind, "Received Stripe event");
    record_stripe_event(&event.kind);

    if event.kind != CHECKOUT_COMPLETED {
        return Ok(Json(ACK));
    }
    let session: CheckoutSession = serde_json::from_value(event.data.object).map_err(|e| {
        warn!(event_id = %event.id, "Unparseable checkout session: {}", e);
        ApiError::bad_request("Invalid payload")
    })?;
    checkout_completed(&state, session).await?;
    Ok(Json(ACK))
}

async fn checkout_completed(state: &AppState, session: CheckoutSession) -> ApiResult<()> {
    let Some(user_id) = session.client_reference_id.as_deref().filter(|u| !u.is_empty()) else {
        error!(session_id = %session.id, "Checkout session has no client_reference_id");
        return Ok(());
    };
    let Some(plan) = session
        .price_id()
        .and_then(|price| state.config.stripe.plan_for_price(price))
    else {
        error!(
            user_id = %user_id,
            session_id = %session.id,
            price_id = ?session.price_id(),
            "Could not determine plan for checkout, no credits granted"
        );
        return Ok(());
    };

    let grant = SubscriptionGrant {
        plan,
        credits: plan.checkout_credits(),
        stripe_customer_id: session.customer.clone(),
        stripe_subscription_id: session.subscription.clone(),
    };
    let outcome = state
        .profiles
        .grant_subscription(user_id, &grant)
        .await
        .map_err(|e| {
            error!(user_id = %user_id, session_id = %session.id, "Failed to apply checkout: {}", e);
            ApiError::internal("Webhook DB update failed")
        })?;

    match outcome {
        GrantOutcome::Granted { balance } => {
            info!(user_id = %user_id, plan = %plan, balance, "Checkout applied")
        }
        GrantOutcome::AlreadyApplied => {
            info!(user_id = %user_id, session_id = %session.id, "Checkout already applied")
        }
        GrantOutcome::ProfileMissing => {
            error!(user_id = %user_id, session_id = %session.id, "No profile for checkout")
        }
    }
    Ok(())
}
