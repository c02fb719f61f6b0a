//! Prometheus metrics recorder and `/metrics` endpoint support.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across crates.

/// Active sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Sessions fully torn down (counter).
pub const SESSIONS_CLEANED_TOTAL: &str = "sessions_cleaned_total";
/// Remote teardown failures left for sweep retry (counter).
pub const CLEANUP_RETRIES_TOTAL: &str = "cleanup_retries_total";
/// Turns that reached normal completion (counter).
pub const TURNS_COMPLETED_TOTAL: &str = "turns_completed_total";
/// Turns that ended in a mid-stream failure (counter).
pub const TURNS_FAILED_TOTAL: &str = "turns_failed_total";
/// Swallowed suggestion generator failures (counter).
pub const SUGGESTION_FAILURES_TOTAL: &str = "suggestion_failures_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Messages dropped on full client channels (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
