//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    auth_callback, continue_generation, create_upload_url, generate_meme, get_credits,
    get_job_status, health, list_past_videos, me, ready, regenerate_script, stripe_webhook,
    subscription_status, update_video_title,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let account_routes = Router::new()
        .route("/me", get(me))
        .route("/credits", get(get_credits))
        .route("/auth/callback", post(auth_callback))
        .route("/subscription-status", get(subscription_status))
        .route("/upload-url", post(create_upload_url));

    let job_routes = Router::new()
        .route("/generate-meme", post(generate_meme))
        .route("/job-status/:job_id", get(get_job_status))
        .route("/continue-generation/:job_id", post(continue_generation))
        .route("/regenerate-script", post(regenerate_script));

    let video_routes = Router::new()
        .route("/past-videos", get(list_past_videos))
        .route("/past-videos/:video_id", patch(update_video_title));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(account_routes)
        .merge(job_routes)
        .merge(video_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        // Stripe retries on its own schedule; keep it outside the per-IP limit.
        .route("/webhook/stripe", post(stripe_webhook));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
