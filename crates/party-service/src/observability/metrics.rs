//! Prometheus metrics for the party service.
//!
//! Naming follows Prometheus conventions: `party_` prefix, `_total` for
//! counters, `_seconds` for histograms. Label values are bounded by code
//! (operation names, error codes, event kinds), never by ids.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the scrape handle.
///
/// # Errors
///
/// Returns an error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("party_room_operation".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set room operation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("party_store_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500,
            ],
        )
        .map_err(|e| format!("Failed to set store query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record a service operation outcome.
///
/// Metric: `party_room_operations_total`, `party_room_operation_duration_seconds`
/// Labels: `operation`, `status` (`success` or an error code)
pub fn record_room_operation(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("party_room_operation_duration_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());

    counter!("party_room_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record a store round trip.
///
/// Metric: `party_store_queries_total`, `party_store_query_duration_seconds`
pub fn record_store_query(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("party_store_query_duration_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());

    counter!("party_store_queries_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record an applied or rejected sync update.
///
/// Metric: `party_sync_updates_total`
/// Labels: `outcome` (`applied`, `forbidden`, `superseded`, `not_found`, `error`)
pub fn record_sync_update(outcome: &'static str) {
    counter!("party_sync_updates_total", "outcome" => outcome).increment(1);
}

/// Record an event published to a room's subscribers.
///
/// Metric: `party_broadcast_events_total`
/// Labels: `event`
pub fn record_broadcast(event: &'static str, subscribers: usize) {
    counter!("party_broadcast_events_total", "event" => event).increment(1);
    counter!("party_broadcast_deliveries_total").increment(subscribers as u64);
}

/// Record an event discarded by a full outbound queue.
///
/// Metric: `party_broadcast_events_dropped_total`
pub fn record_broadcast_drop() {
    counter!("party_broadcast_events_dropped_total").increment(1);
}

/// Record a retry of a host-promotion or termination commit.
///
/// Metric: `party_critical_commit_retries_total`
/// Labels: `outcome` (`recovered`, `failed`)
pub fn record_critical_retry(outcome: &'static str) {
    counter!("party_critical_commit_retries_total", "outcome" => outcome).increment(1);
}

/// Record a participant removed by the disconnect grace timer.
///
/// Metric: `party_grace_expirations_total`
pub fn record_grace_expiration() {
    counter!("party_grace_expirations_total").increment(1);
}

/// Metric: `party_active_rooms`
pub fn set_active_rooms(count: usize) {
    gauge!("party_active_rooms").set(count as f64);
}

/// Metric: `party_active_connections`
pub fn set_active_connections(count: usize) {
    gauge!("party_active_connections").set(count as f64);
}

/// Record an HTTP request.
///
/// Metric: `party_http_requests_total`, `party_http_request_duration_seconds`
/// Labels: `method`, `endpoint` (normalized), `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("party_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("party_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Collapse room ids so the label set stays bounded.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" | "/v1/rooms" => path.to_string(),
        _ => normalize_room_endpoint(path),
    }
}

fn normalize_room_endpoint(path: &str) -> String {
    let Some(rest) = path.strip_prefix("/v1/rooms/") else {
        return "/other".to_string();
    };
    let mut segments = rest.split('/');
    let id_segment = segments.next().unwrap_or_default();
    if id_segment.is_empty() {
        return "/other".to_string();
    }
    match (segments.next(), segments.next()) {
        (None, _) => "/v1/rooms/{room_id}".to_string(),
        (Some(action @ ("join" | "leave" | "sync" | "messages" | "ws")), None) => {
            format!("/v1/rooms/{{room_id}}/{action}")
        }
        _ => "/other".to_string(),
    }
}
