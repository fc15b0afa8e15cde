//! Deterministic URL issuer for tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::client::ObjectUrls;
use crate::error::{StorageError, StorageResult};

/// Issues `{base}/{key}?expires={secs}` URLs without signing anything.
#[derive(Debug, Clone)]
pub struct StaticObjectUrls {
    base: String,
    fail: bool,
}

impl StaticObjectUrls {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            fail: false,
        }
    }

    /// Issuer whose every call fails.
    pub fn failing() -> Self {
        Self {
            base: String::new(),
            fail: true,
        }
    }

    fn url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        if self.fail {
            return Err(StorageError::presign_failed("presigning disabled"));
        }
        if key.is_empty() {
            return Err(StorageError::invalid_key(key));
        }
        Ok(format!(
            "{}/{}?expires={}",
            self.base,
            urlencoding::encode(key).replace("%2F", "/"),
            expires_in.as_secs()
        ))
    }
}

#[async_trait]
impl ObjectUrls for StaticObjectUrls {
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.url(key, expires_in)
    }

    async fn presign_put(
        &self,
        key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.url(key, expires_in)
    }
}
