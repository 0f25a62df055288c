//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInstall(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// OTP requests handled (counter, labels: outcome).
pub const OTP_REQUESTS_TOTAL: &str = "otp_requests_total";
/// Sends retried after a timeout (counter).
pub const OTP_SEND_RETRIES_TOTAL: &str = "otp_send_retries_total";
/// Send attempt duration seconds (histogram, labels: attempt).
pub const OTP_SEND_DURATION_SECONDS: &str = "otp_send_duration_seconds";
/// Session re-establishments (counter, labels: cause).
pub const SESSION_RECONNECTS_TOTAL: &str = "session_reconnects_total";
/// Whether a session is open (gauge). 1 = connected, 0 = not.
pub const SESSION_CONNECTED: &str = "session_connected";
/// Failed liveness pings (counter).
pub const KEEPALIVE_FAILURES_TOTAL: &str = "keepalive_failures_total";
