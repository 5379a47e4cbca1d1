//! Prometheus metrics exposition
//!
//! The session crate records:
//!
//! - `session_refresh_total` (counter): label `outcome`
//! - `session_requests_queued_total` (counter)
//! - `session_requests_cancelled_total` (counter)
//! - `session_requests_replayed_total` (counter)
//! - `session_ended_total` (counter): label `reason`
//! - `session_pending_requests` (gauge)
//!
//! With `--metrics` the binary installs a recorder up front and dumps the
//! text exposition to stderr before exiting.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}
