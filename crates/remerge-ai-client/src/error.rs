//! AI provider error types.

use thiserror::Error;

/// Result type for provider calls.
pub type AiResult<T> = Result<T, AiError>;

/// Errors returned by capability clients.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{provider} returned {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} reported failure: {message}")]
    UpstreamFailed {
        provider: &'static str,
        message: String,
    },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn upstream_failed(provider: &'static str, message: impl Into<String>) -> Self {
        Self::UpstreamFailed {
            provider,
            message: message.into(),
        }
    }

    pub fn invalid_response(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout(operation.into())
    }

    /// Transient failures worth another attempt: network trouble, 429 and 5xx.
    ///
    /// Semantic failures (the provider said "failed", the payload was
    /// unusable) are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AiError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Failures where the provider cannot have acted on the request, so a
    /// non-idempotent call may be sent again: no connection, 429 and 5xx.
    pub fn is_safe_to_resend(&self) -> bool {
        match self {
            AiError::Network(e) => e.is_connect(),
            AiError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// HTTP status of the failed call, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AiError::Http { status, .. } => Some(*status),
            AiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Turn a non-success response into [`AiError::Http`], keeping the body for logs.
pub(crate) async fn ensure_success(
    provider: &'static str,
    response: reqwest::Response,
) -> AiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AiError::Http {
        provider,
        status: status.as_u16(),
        body,
    })
}

/// Read an env var, treating empty as unset.
pub(crate) fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Read a required secret.
pub(crate) fn env_required(name: &str) -> AiResult<String> {
    env_nonempty(name).ok_or_else(|| AiError::config_error(format!("{} not set", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let http = |status| AiError::Http {
            provider: "test",
            status,
            body: String::new(),
        };
        assert!(http(503).is_retryable());
        assert!(http(429).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!AiError::upstream_failed("lemon_slice", "bad avatar").is_retryable());
        assert!(!AiError::timeout("poll").is_retryable());
        assert!(http(502).is_safe_to_resend());
        assert!(!http(409).is_safe_to_resend());
        assert!(!AiError::timeout("render call").is_safe_to_resend());
    }

    #[test]
    fn test_error_message_names_provider() {
        let err = AiError::Http {
            provider: "creatomate",
            status: 402,
            body: "quota".into(),
        };
        assert_eq!(err.to_string(), "creatomate returned 402: quota");
        assert_eq!(err.status(), Some(402));
    }
}
