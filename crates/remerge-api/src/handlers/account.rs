//! Account handlers: identity, credits and subscription.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::{error, info};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub email: Option<String>,
}

/// The authenticated user's id and email.
pub async fn me(user: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.uid,
        email: user.email,
    })
}

#[derive(Serialize)]
pub struct CreditsResponse {
    pub credits: i64,
}

/// Current credit balance; a user without a profile has none.
pub async fn get_credits(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<CreditsResponse>> {
    let credits = state.credits.get_balance(&user.uid).await.map_err(|e| {
        error!(user_id = %user.uid, "Failed to fetch credits: {}", e);
        ApiError::internal("Could not fetch credit balance.")
    })?;
    Ok(Json(CreditsResponse { credits }))
}

#[derive(Serialize)]
pub struct CallbackResponse {
    pub success: bool,
}

/// Called by the frontend after sign-in; makes sure the profile exists.
///
/// Profile setup failures are logged and do not fail the sign-in.
pub async fn auth_callback(
    State(state): State<AppState>,
    user: AuthUser,
) -> Json<CallbackResponse> {
    match state.profiles.ensure_profile(&user.uid).await {
        Ok(profile) => info!(user_id = %user.uid, credits = profile.credits, "Profile ready"),
        Err(e) => error!(user_id = %user.uid, "Failed to ensure profile: {}", e),
    }
    Json(CallbackResponse { success: true })
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusResponse {
    pub is_active: bool,
    pub status: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub plan_name: Option<String>,
}

/// Subscription details from the profile.
pub async fn subscription_status(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<SubscriptionStatusResponse>> {
    let profile = state.profiles.get_profile(&user.uid).await.map_err(|e| {
        error!(user_id = %user.uid, "Failed to fetch subscription status: {}", e);
        ApiError::internal("Could not fetch subscription status.")
    })?;

    let response = match profile {
        Some(profile) => SubscriptionStatusResponse {
            is_active: profile.has_active_subscription(),
            status: profile.subscription_status,
            stripe_customer_id: profile.stripe_customer_id,
            plan_name: profile.subscription_plan,
        },
        None => SubscriptionStatusResponse {
            is_active: false,
            status: Some("free".to_string()),
            stripe_customer_id: None,
            plan_name: None,
        },
    };
    Ok(Json(response))
}
