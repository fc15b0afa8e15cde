//! Reachability check for rendered videos.
//!
//! Render URLs are returned before the file is written, so the pipeline
//! polls with HEAD requests until the object answers 2xx.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client};
use tracing::{debug, info};

use crate::capabilities::UrlVerifier;
use crate::error::{AiError, AiResult};
use crate::retry::{poll_until, Poll, RetryPolicy};

/// HEAD-polling [`UrlVerifier`].
#[derive(Clone)]
pub struct HttpUrlVerifier {
    http: Client,
    policy: RetryPolicy,
}

impl HttpUrlVerifier {
    /// HEAD every 10s, 12 attempts, 15s per call.
    pub fn new() -> AiResult<Self> {
        Self::with_policy(
            RetryPolicy::new("verify_url")
                .with_interval(Duration::from_secs(10))
                .with_max_attempts(12)
                .with_per_call_timeout(Duration::from_secs(15)),
        )
    }

    pub fn with_policy(policy: RetryPolicy) -> AiResult<Self> {
        let http = Client::builder()
            .redirect(redirect::Policy::limited(10))
            .build()
            .map_err(AiError::Network)?;
        Ok(Self { http, policy })
    }
}

#[async_trait]
impl UrlVerifier for HttpUrlVerifier {
    async fn wait_until_reachable(&self, url: &str) -> AiResult<()> {
        poll_until(&self.policy, |attempt| {
            let request = self.http.head(url);
            async move {
                match request.send().await {
                    Ok(response) if response.status().is_success() => Ok(Poll::Ready(())),
                    Ok(response) => {
                        debug!(attempt, status = response.status().as_u16(), "URL not ready");
                        Ok(Poll::Pending)
                    }
                    Err(e) => {
                        debug!(attempt, "URL check failed: {}", e);
                        Ok(Poll::Pending)
                    }
                }
            }
        })
        .await?;
        info!(url = %url, "Final URL is reachable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verifier(attempts: u32) -> HttpUrlVerifier {
        HttpUrlVerifier::with_policy(
            RetryPolicy::new("verify_url")
                .with_interval(Duration::from_millis(1))
                .with_max_attempts(attempts),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_becomes_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/final.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/final.mp4"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        verifier(5)
            .wait_until_reachable(&format!("{}/final.mp4", server.uri()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_reachable_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(403))
            .expect(3)
            .mount(&server)
            .await;

        let err = verifier(3)
            .wait_until_reachable(&format!("{}/missing.mp4", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Timeout(_)));
    }
}
