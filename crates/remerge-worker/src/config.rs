//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long one stream read blocks when the stream is empty
    pub block_timeout: Duration,
    /// Entries claimed per read
    pub read_count: usize,
    /// Back-off after the queue could not be reached
    pub transport_backoff: Duration,
    /// Back-off after any other loop error
    pub error_backoff: Duration,
    /// Scripts longer than this are cut before lip-sync
    pub script_max_chars: usize,
    /// Lifetime of presigned object URLs handed to providers
    pub presign_expiry: Duration,
    /// Consecutive loop failures logged before suppression
    pub max_logged_failures: u32,
    /// Port for the Prometheus exporter (disabled when unset)
    pub metrics_port: Option<u16>,
    /// Entries left unacknowledged this long by another consumer are taken over.
    /// Must exceed the longest Phase 2 run.
    pub claim_min_idle: Duration,
    /// Stable consumer name; a random one is generated when unset
    pub consumer_name: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            block_timeout: Duration::from_millis(5000),
            read_count: 1,
            transport_backoff: Duration::from_secs(5),
            error_backoff: Duration::from_secs(2),
            script_max_chars: 1000,
            presign_expiry: Duration::from_secs(3600),
            max_logged_failures: 5,
            metrics_port: None,
            claim_min_idle: Duration::from_secs(30 * 60),
            consumer_name: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            block_timeout: Duration::from_millis(
                std::env::var("WORKER_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
            ),
            read_count: std::env::var("WORKER_READ_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.read_count),
            transport_backoff: Duration::from_secs(
                std::env::var("WORKER_TRANSPORT_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            error_backoff: Duration::from_secs(
                std::env::var("WORKER_ERROR_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            ),
            script_max_chars: std::env::var("WORKER_SCRIPT_MAX_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.script_max_chars),
            presign_expiry: Duration::from_secs(
                std::env::var("WORKER_PRESIGN_EXPIRY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            max_logged_failures: defaults.max_logged_failures,
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            claim_min_idle: std::env::var("WORKER_CLAIM_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            consumer_name: std::env::var("WORKER_CONSUMER_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}
