//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job submission, review continuation and status endpoints
//! - Presigned upload URLs, credits, subscription and catalog endpoints
//! - A signed Stripe webhook that credits completed checkouts
//! - Supabase access token verification
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod stripe;

pub use auth::{AuthUser, JwtVerifier};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
pub use stripe::StripeConfig;
