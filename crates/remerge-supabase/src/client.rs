//! Supabase PostgREST client.
//!
//! Requests authenticate with the service-role key. Reads are retried on
//! transient failures; writes are sent once and callers decide how to
//! recover, since a lost response may hide an applied write.

use std::time::{Duration, Instant};

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{SupabaseError, SupabaseResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};

/// Supabase client configuration.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Service-role key
    pub service_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration for reads
    pub retry: RetryConfig,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> SupabaseResult<Self> {
        let url = std::env::var("SUPABASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SupabaseError::config_error("SUPABASE_URL not set"))?;
        let service_key = std::env::var("SUPABASE_SERVICE_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SupabaseError::config_error("SUPABASE_SERVICE_KEY not set"))?;

        let timeout_secs: u64 = std::env::var("SUPABASE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::new(url, service_key)
        })
    }
}

/// PostgREST client over `reqwest`.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    config: SupabaseConfig,
    rest_url: String,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> SupabaseResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("remerge-supabase/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SupabaseError::Network)?;

        let rest_url = format!("{}/rest/v1", config.url.trim_end_matches('/'));

        Ok(Self {
            http,
            config,
            rest_url,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> SupabaseResult<Self> {
        Self::new(SupabaseConfig::from_env()?)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    /// `GET /{table}?{query}`, retried on transient errors.
    pub async fn select<T: DeserializeOwned>(
        &self,
        operation: &str,
        table: &str,
        query: &[(&str, String)],
    ) -> SupabaseResult<Vec<T>> {
        with_retry(&self.config.retry, operation, move || async move {
            let request = self.request(Method::GET, table).query(query);
            self.execute(operation, request).await
        })
        .await
    }

    /// `POST /{table}` returning the inserted rows.
    ///
    /// `prefer` is appended to `return=representation`, e.g.
    /// `resolution=ignore-duplicates`.
    pub async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &str,
        table: &str,
        body: &B,
        prefer: Option<&str>,
    ) -> SupabaseResult<Vec<T>> {
        let prefer = match prefer {
            Some(extra) => format!("return=representation,{}", extra),
            None => "return=representation".to_string(),
        };
        let request = self
            .request(Method::POST, table)
            .header("Prefer", prefer)
            .json(body);
        self.execute(operation, request).await
    }

    /// `PATCH /{table}?{filters}` returning the updated rows.
    ///
    /// An empty result means no row matched the filters.
    pub async fn update<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &str,
        table: &str,
        filters: &[(&str, String)],
        body: &B,
    ) -> SupabaseResult<Vec<T>> {
        let request = self
            .request(Method::PATCH, table)
            .query(filters)
            .header("Prefer", "return=representation")
            .json(body);
        self.execute(operation, request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> SupabaseResult<Vec<T>> {
        let started = Instant::now();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                record_request(operation, 0, started.elapsed().as_secs_f64() * 1000.0);
                return Err(SupabaseError::Network(e));
            }
        };
        let status = response.status();
        record_request(
            operation,
            status.as_u16(),
            started.elapsed().as_secs_f64() * 1000.0,
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::from_http_status(status.as_u16(), body));
        }

        let text = response.text().await?;
        debug!(operation = %operation, status = status.as_u16(), "Supabase request completed");
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text)
            .map_err(|e| SupabaseError::invalid_response(format!("{}: {}", operation, e)))
    }
}

/// PostgREST equality filter value.
pub fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}
