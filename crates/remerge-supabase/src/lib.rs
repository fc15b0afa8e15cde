//! Supabase PostgREST client.
//!
//! This crate provides:
//! - A service-key authenticated PostgREST client with retries and metrics
//! - Profiles and atomic credit deduction
//! - The generated-video catalog
//! - In-memory implementations for tests

pub mod catalog;
pub mod client;
pub mod credits;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod retry;

pub use catalog::{Catalog, VideoCatalog, LIST_LIMIT};
pub use client::{SupabaseClient, SupabaseConfig};
pub use credits::{
    Credits, DeductOutcome, GrantOutcome, Profile, Profiles, ProfilesRepository,
    SubscriptionGrant, INITIAL_CREDITS,
};
pub use error::{SupabaseError, SupabaseResult};
pub use retry::RetryConfig;
