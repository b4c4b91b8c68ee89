//! Prometheus metrics.
//!
//! Installs a global recorder from `metrics-exporter-prometheus`, names the
//! metrics the server records, and serves them at `/metrics`. When no
//! recorder is installed the `metrics` macros are no-ops.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric names -------------------------------------------------------------

/// Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "objectstore_http_requests_total";

/// Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "objectstore_http_request_duration_seconds";

/// Labels: operation, status.
pub const S3_OPERATIONS_TOTAL: &str = "objectstore_s3_operations_total";

/// Labels: result (anonymous, authenticated, denied).
pub const AUTH_RESULTS_TOTAL: &str = "objectstore_auth_results_total";

pub const BYTES_RECEIVED_TOTAL: &str = "objectstore_bytes_received_total";

pub const BYTES_SENT_TOTAL: &str = "objectstore_bytes_sent_total";

// -- Recorder -----------------------------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder and register descriptions.
/// Calling it again returns the existing handle.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(S3_OPERATIONS_TOTAL, "Total S3 operations by type");
    describe_counter!(AUTH_RESULTS_TOTAL, "Credential resolution outcomes");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Total bytes received (request bodies)");
    describe_counter!(BYTES_SENT_TOTAL, "Total bytes sent (response bodies)");
}

/// Count one S3 operation.
pub fn record_operation(operation: &'static str, status: StatusCode) {
    counter!(
        S3_OPERATIONS_TOTAL,
        "operation" => operation,
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}

// -- Middleware ---------------------------------------------------------------

/// Records request count and latency for every request except `/metrics`.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Collapse bucket and key names into route templates so label
/// cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" => path.to_string(),
        _ => match path.trim_start_matches('/').split_once('/') {
            None => "/{bucket}".to_string(),
            Some((_, "")) => "/{bucket}".to_string(),
            Some(_) => "/{bucket}/{key}".to_string(),
        },
    }
}

// -- Endpoint -----------------------------------------------------------------

/// `GET /metrics`
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics are disabled").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_fixed_routes() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn test_normalize_path_bucket() {
        assert_eq!(normalize_path("/my-bucket"), "/{bucket}");
        assert_eq!(normalize_path("/my-bucket/"), "/{bucket}");
    }

    #[test]
    fn test_normalize_path_object() {
        assert_eq!(normalize_path("/my-bucket/key"), "/{bucket}/{key}");
        assert_eq!(
            normalize_path("/my-bucket/path/to/object.txt"),
            "/{bucket}/{key}"
        );
    }
}
