//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the global Prometheus recorder.
///
/// The returned handle renders the `/metrics` body. Fails if another
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Connections registered with the hub (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections removed from the hub (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Connections currently registered (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Inbound messages fanned out (counter).
pub const BROADCASTS_TOTAL: &str = "relay_broadcasts_total";
/// Per-recipient enqueues performed by fan-out (counter).
pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
/// Connections dropped because their queue was full (counter).
pub const EVICTIONS_TOTAL: &str = "relay_evictions_total";
/// Upgrade requests refused before a connection existed (counter, labels: reason).
pub const UPGRADES_REJECTED_TOTAL: &str = "relay_upgrades_rejected_total";
