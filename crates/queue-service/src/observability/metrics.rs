//! Metrics definitions for the queue service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `queue_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `kind`: 2 values (new, resumed)
//! - `reason` (ended): bounded by `RevokeReason` (4 values)
//! - `reason` (rejected): 2 values (rate_limited, origin)
//! - `message_type`: bounded by `ServerMessage` variants (6 values)
//! - `actor_type`: 2 values (coordinator, connection)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Queue waits range from instant grants to most of an hour
        .set_buckets_for_metric(
            Matcher::Full("queue_wait_duration_seconds".to_string()),
            &[
                1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
            ],
        )
        .map_err(|e| format!("Failed to set wait duration buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("queue_session_duration_seconds".to_string()),
            &[
                10.0, 30.0, 60.0, 300.0, 600.0, 1200.0, 1800.0, 2700.0, 3600.0,
            ],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Occupancy (Gauges)
// ============================================================================

/// Set the number of registered WebSocket connections.
///
/// Metric: `queue_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("queue_connections_active").set(count as f64);
}

/// Set the number of clients waiting in the admission queue.
///
/// Metric: `queue_waiting_clients`
pub fn set_waiting_clients(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("queue_waiting_clients").set(count as f64);
}

/// Set whether the exclusive resource is held (1) or idle (0).
///
/// Metric: `queue_session_active`
pub fn set_session_active(active: bool) {
    gauge!("queue_session_active").set(if active { 1.0 } else { 0.0 });
}

// ============================================================================
// Session lifecycle (Counters + Histograms)
// ============================================================================

/// Record a session grant.
///
/// Metric: `queue_sessions_started_total`
/// Labels: `kind` (new, resumed)
pub fn record_session_started(resumed: bool) {
    let kind = if resumed { "resumed" } else { "new" };
    counter!("queue_sessions_started_total", "kind" => kind).increment(1);
}

/// Record a session end and its duration.
///
/// Metrics: `queue_sessions_ended_total`, `queue_session_duration_seconds`
/// Labels: `reason`
pub fn record_session_ended(reason: &'static str, duration: Duration) {
    counter!("queue_sessions_ended_total", "reason" => reason).increment(1);
    histogram!("queue_session_duration_seconds").record(duration.as_secs_f64());
}

/// Record how long a promoted client waited since its join request.
///
/// Metric: `queue_wait_duration_seconds`
pub fn record_wait_duration(duration: Duration) {
    histogram!("queue_wait_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Gateway + delivery (Counters)
// ============================================================================

/// Record a connection refused at the gateway.
///
/// Metric: `queue_connections_rejected_total`
/// Labels: `reason` (rate_limited, origin)
pub fn record_connection_rejected(reason: &'static str) {
    counter!("queue_connections_rejected_total", "reason" => reason).increment(1);
}

/// Record a failed best-effort delivery to one client.
///
/// Metric: `queue_broadcast_failures_total`
/// Labels: `message_type`
pub fn record_broadcast_failure(message_type: &'static str) {
    counter!("queue_broadcast_failures_total", "message_type" => message_type).increment(1);
}

// ============================================================================
// Actors
// ============================================================================

/// Set the coordinator's pending mailbox depth.
///
/// Metric: `queue_coordinator_mailbox_depth`
pub fn set_coordinator_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("queue_coordinator_mailbox_depth").set(depth as f64);
}

/// Record a panicked actor task.
///
/// Metric: `queue_actor_panics_total`
/// Labels: `actor_type` (coordinator, connection)
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("queue_actor_panics_total", "actor_type" => actor_type).increment(1);
}
