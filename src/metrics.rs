//! Prometheus metrics for the broker.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "broker_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "broker_http_request_duration_seconds";

/// Total broker operations (counter). Labels: operation, outcome.
pub const OPERATIONS_TOTAL: &str = "broker_operations_total";

/// Service instances currently recorded (gauge).
pub const INSTANCES_TOTAL: &str = "broker_instances_total";

/// Service bindings currently recorded (gauge).
pub const BINDINGS_TOTAL: &str = "broker_bindings_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(OPERATIONS_TOTAL, "Total broker operations by type and outcome");
    describe_gauge!(INSTANCES_TOTAL, "Service instances currently recorded");
    describe_gauge!(BINDINGS_TOTAL, "Service bindings currently recorded");
}

/// Count one broker operation, e.g. `("provision", "accepted")`.
pub fn record_operation(operation: &'static str, outcome: &'static str) {
    counter!(OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
}

/// Publish the current instance and binding counts.
pub fn update_inventory(instances: usize, bindings: usize) {
    gauge!(INSTANCES_TOTAL).set(instances as f64);
    gauge!(BINDINGS_TOTAL).set(bindings as f64);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
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

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Instance and binding IDs are replaced by placeholders:
/// - `/v2/service_instances/abc` -> `/v2/service_instances/{instance_id}`
/// - `/v2/service_instances/abc/last_operation`
///   -> `/v2/service_instances/{instance_id}/last_operation`
/// - `/v2/service_instances/abc/service_bindings/b1`
///   -> `/v2/service_instances/{instance_id}/service_bindings/{binding_id}`
///
/// Anything unrecognised collapses to `/other`.
fn normalize_path(path: &str) -> String {
    match path {
        "/health" | "/openapi.json" | "/metrics" | "/v2/catalog" => return path.to_string(),
        _ => {}
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["v2", "service_instances", _] => "/v2/service_instances/{instance_id}".to_string(),
        ["v2", "service_instances", _, "last_operation"] => {
            "/v2/service_instances/{instance_id}/last_operation".to_string()
        }
        ["v2", "service_instances", _, "service_bindings", _] => {
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}".to_string()
        }
        _ => "/other".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let Some(handle) = PROMETHEUS_HANDLE.get() else {
        return (
            StatusCode::NOT_FOUND,
            [("content-type", "text/plain")],
            "metrics disabled\n".to_string(),
        );
    };
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        handle.render(),
    )
}

// -- Tests --------------------------------------------------------------------
