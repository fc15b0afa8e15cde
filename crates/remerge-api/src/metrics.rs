//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;
use tracing::error;

/// Install the Prometheus recorder.
///
/// Returns `None` when a recorder is already installed.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to install Prometheus recorder: {}", e);
            None
        }
    }
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "remerge_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "remerge_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "remerge_http_requests_in_flight";

    // Job metrics
    pub const JOBS_ENQUEUED_TOTAL: &str = "remerge_jobs_enqueued_total";
    pub const JOBS_ENQUEUE_FAILED_TOTAL: &str = "remerge_jobs_enqueue_failed_total";

    // Billing metrics
    pub const STRIPE_EVENTS_TOTAL: &str = "remerge_stripe_events_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "remerge_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a job message appended to the stream (`new` or `continue`).
pub fn record_job_enqueued(job_type: &'static str) {
    counter!(names::JOBS_ENQUEUED_TOTAL, "type" => job_type).increment(1);
}

pub fn record_job_enqueue_failed(job_type: &'static str) {
    counter!(names::JOBS_ENQUEUE_FAILED_TOTAL, "type" => job_type).increment(1);
}

pub fn record_stripe_event(event_type: &str) {
    counter!(names::STRIPE_EVENTS_TOTAL, "type" => event_type.to_string()).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

fn uuid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .expect("valid uuid pattern")
    })
}

fn id_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/(job-status|continue-generation|past-videos)/[^/]+")
            .expect("valid id segment pattern")
    })
}

/// Sanitize path for metrics labels (replace job and video IDs).
fn sanitize_path(path: &str) -> String {
    let path = uuid_pattern().replace_all(path, ":id");
    id_segment_pattern()
        .replace_all(&path, "/$1/:id")
        .into_owned()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
