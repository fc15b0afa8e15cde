//! Fixed-interval retry and polling for provider calls.
//!
//! Every long-running provider step is bounded by a [`RetryPolicy`]: a
//! fixed sleep between attempts, a maximum attempt count and an optional
//! per-call timeout, so each stage has a deterministic worst-case duration.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AiError, AiResult};

/// Bounded fixed-interval policy for one provider operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Sleep between attempts
    pub interval: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Timeout applied to each individual call
    pub per_call_timeout: Option<Duration>,
    /// Operation name for logging
    pub operation_name: String,
}

impl RetryPolicy {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 3,
            per_call_timeout: None,
            operation_name: operation_name.into(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = Some(timeout);
        self
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn total_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }

    async fn call<T, Fut>(&self, fut: Fut) -> AiResult<T>
    where
        Fut: Future<Output = AiResult<T>>,
    {
        match self.per_call_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| AiError::timeout(format!("{} call", self.operation_name)))?,
            None => fut.await,
        }
    }
}

/// Outcome of one poll of a long-running upstream job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Errors that another attempt might fix.
fn worth_retrying(error: &AiError) -> bool {
    error.is_retryable()
        || matches!(
            error,
            AiError::Timeout(_) | AiError::InvalidResponse { .. }
        )
}

/// Run `op` up to `policy.max_attempts` times, sleeping `policy.interval`
/// between failures.
///
/// Semantic failures (`UpstreamFailed`, client errors) return immediately.
pub async fn retry_fixed<T, F, Fut>(policy: &RetryPolicy, op: F) -> AiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AiResult<T>>,
{
    retry_fixed_if(policy, worth_retrying, op).await
}

/// Like [`retry_fixed`], but only errors accepted by `should_retry` get
/// another attempt.
pub async fn retry_fixed_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut op: F,
) -> AiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AiResult<T>>,
    P: Fn(&AiError) -> bool,
{
    let mut attempt = 1;
    loop {
        match policy.call(op()).await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) && attempt < policy.max_attempts => {
                warn!(
                    operation = %policy.operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Attempt failed, retrying in {:?}: {}",
                    policy.interval,
                    e
                );
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Poll `op` until it reports [`Poll::Ready`].
///
/// Transient errors count as an attempt and polling continues. Exhausting
/// the attempts yields [`AiError::Timeout`].
pub async fn poll_until<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> AiResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AiResult<Poll<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        match policy.call(op(attempt)).await {
            Ok(Poll::Ready(value)) => return Ok(value),
            Ok(Poll::Pending) => {
                debug!(
                    operation = %policy.operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Still pending"
                );
            }
            Err(e) if worth_retrying(&e) => {
                warn!(
                    operation = %policy.operation_name,
                    attempt,
                    "Poll failed, will retry: {}",
                    e
                );
            }
            Err(e) => return Err(e),
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(AiError::timeout(format!(
        "{} after {} attempts",
        policy.operation_name, policy.max_attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(name: &str, attempts: u32) -> RetryPolicy {
        RetryPolicy::new(name)
            .with_interval(Duration::from_millis(1))
            .with_max_attempts(attempts)
    }

    fn server_error() -> AiError {
        AiError::Http {
            provider: "test",
            status: 502,
            body: String::new(),
        }
    }

    #[test]
    fn test_total_wait() {
        let policy = RetryPolicy::new("verify")
            .with_interval(Duration::from_secs(10))
            .with_max_attempts(12);
        assert_eq!(policy.total_wait(), Duration::from_secs(110));
    }

    #[tokio::test]
    async fn test_retry_fixed_recovers() {
        let calls = AtomicU32::new(0);
        let result = retry_fixed(&fast("summary", 3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(server_error())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fixed_stops_on_semantic_failure() {
        let calls = AtomicU32::new(0);
        let result: AiResult<()> = retry_fixed(&fast("render", 5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::upstream_failed("creatomate", "template missing")) }
        })
        .await;

        assert!(matches!(result, Err(AiError::UpstreamFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_fixed_if_respects_predicate() {
        let calls = AtomicU32::new(0);
        let result: AiResult<()> = retry_fixed_if(&fast("render", 5), AiError::is_safe_to_resend, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::timeout("render call")) }
        })
        .await;

        assert!(matches!(result, Err(AiError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_call_timeout_counts_as_attempt() {
        let policy = fast("slow", 2).with_per_call_timeout(Duration::from_millis(5));
        let calls = AtomicU32::new(0);
        let result: AiResult<()> = retry_fixed(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(AiError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_poll_until_ready() {
        let result = poll_until(&fast("task", 5), |attempt| async move {
            match attempt {
                1 => Err(server_error()),
                2 => Ok(Poll::Pending),
                _ => Ok(Poll::Ready(attempt)),
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_poll_until_exhausts() {
        let result: AiResult<()> =
            poll_until(&fast("lip sync", 3), |_| async { Ok(Poll::Pending) }).await;
        match result {
            Err(AiError::Timeout(msg)) => assert!(msg.contains("3 attempts")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
