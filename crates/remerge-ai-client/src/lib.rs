//! External capability clients used by the job pipeline.
//!
//! This crate provides:
//! - Capability traits (`Summarizer`, `ScriptWriter`, `Moderator`,
//!   `Synthesizer`, `Compositor`, `UrlVerifier`)
//! - HTTP clients for Twelve Labs, OpenAI, Lemon Slice and Creatomate
//! - A fixed-interval retry/poll policy shared by all of them

pub mod capabilities;
pub mod creatomate;
pub mod error;
pub mod lemon_slice;
pub mod openai;
pub mod retry;
pub mod twelve_labs;
pub mod verify;

pub use capabilities::{
    Compositor, Moderator, ModerationVerdict, ScriptWriter, Summarizer, Synthesizer, UrlVerifier,
    VideoSummary,
};
pub use creatomate::{CreatomateClient, CreatomateConfig};
pub use error::{AiError, AiResult};
pub use lemon_slice::{LemonSliceClient, LemonSliceConfig};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use retry::{poll_until, retry_fixed, retry_fixed_if, Poll, RetryPolicy};
pub use twelve_labs::{TwelveLabsClient, TwelveLabsConfig};
pub use verify::HttpUrlVerifier;
