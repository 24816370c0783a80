//! Prometheus metrics for the edge server.
//!
//! Served from the dedicated metrics listener (`EDGE_METRICS_PORT`).
//! Covers sync activity, cache population, token-mirror lookups, and
//! HTTP traffic per surface.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const SYNC_CYCLES_TOTAL: &str = "edge_sync_cycles_total";
    pub const SYNC_FAILURES_TOTAL: &str = "edge_sync_failures_total";
    pub const SYNC_EVENTS_TOTAL: &str = "edge_sync_events_total";

    pub const CACHE_ENTRIES: &str = "edge_cache_entries";
    pub const TRACKED_ENVIRONMENTS: &str = "edge_tracked_environments";

    pub const TOKEN_LOOKUPS_TOTAL: &str = "edge_token_lookups_total";

    pub const HTTP_REQUESTS_TOTAL: &str = "edge_http_requests_total";
}

/// Install the Prometheus recorder. Called once at startup; returns
/// `false` when already installed (tests, restarts of the builder).
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format. `None` when metrics
/// were never initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record a completed sync cycle (bootstrap, poll tick, forced refresh,
/// reconnect resync).
pub fn record_sync_cycle(trigger: &'static str) {
    counter!(names::SYNC_CYCLES_TOTAL, "trigger" => trigger).increment(1);
}

pub fn record_sync_failure(environment: &str) {
    counter!(names::SYNC_FAILURES_TOTAL, "environment" => environment.to_string()).increment(1);
}

/// Record a pub/sub event by its routing type.
pub fn record_sync_event(event_type: &str) {
    counter!(names::SYNC_EVENTS_TOTAL, "type" => event_type.to_string()).increment(1);
}

pub fn record_cache_entries(environment: &str, entity: &'static str, count: usize) {
    gauge!(
        names::CACHE_ENTRIES,
        "environment" => environment.to_string(),
        "entity" => entity
    )
    .set(count as f64);
}

pub fn record_tracked_environments(count: usize) {
    gauge!(names::TRACKED_ENVIRONMENTS).set(count as f64);
}

pub fn record_token_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(names::TOKEN_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_http_request(surface: &'static str, status: u16) {
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "surface" => surface,
        "status" => status.to_string()
    )
    .increment(1);
}
