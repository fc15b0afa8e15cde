//! Redis Streams job queue and job status store.
//!
//! This crate provides:
//! - Job enqueueing and consumer-group reads via Redis Streams
//! - The `new` / `continue` wire messages
//! - Per-job status hashes with expiry and compare-and-set
//! - In-memory implementations for tests

pub mod error;
pub mod memory;
pub mod message;
pub mod queue;
pub mod status;

pub use error::{QueueError, QueueResult};
pub use message::{ContinueJobData, JobMessage, JobType, NewJobData, StreamEntry};
pub use queue::{GroupInfo, JobQueue, MessageQueue, QueueConfig, QueueDiagnostics};
pub use status::{status_key, RedisStatusStore, StatusStore, STATUS_KEY_PREFIX};
