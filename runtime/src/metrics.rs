//! Prometheus metrics for the booking coordinator.
//!
//! Metric families:
//! - Holds acquired, released and failed
//! - Cart rollbacks
//! - Session starts and endings, countdown expiries
//! - Reservation-service call latency
//! - Store action throughput
//!
//! # Example
//!
//! ```rust,no_run
//! use roomhold_runtime::metrics::MetricsExporter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut exporter = MetricsExporter::new(Some("0.0.0.0:9090".parse()?));
//! exporter.start()?;
//!
//! // Or keep them in-process and render on demand
//! let mut local = MetricsExporter::new(None);
//! local.start()?;
//! println!("{}", local.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Holds acquired from the reservation service
pub const HOLDS_ACQUIRED: &str = "roomhold.holds.acquired";
/// Holds released back to the reservation service
pub const HOLDS_RELEASED: &str = "roomhold.holds.released";
/// Hold acquisitions that failed, labelled by `reason`
pub const HOLDS_FAILED: &str = "roomhold.holds.failed";
/// Optimistic cart changes that were rolled back
pub const CART_ROLLBACKS: &str = "roomhold.cart.rollbacks";
/// Booking sessions started
pub const SESSIONS_STARTED: &str = "roomhold.sessions.started";
/// Booking sessions ended, labelled by `status`
pub const SESSIONS_ENDED: &str = "roomhold.sessions.ended";
/// Countdowns that reached zero
pub const COUNTDOWN_EXPIRED: &str = "roomhold.countdown.expired";
/// Reservation-service call latency, labelled by `call`
pub const BACKEND_CALL_DURATION: &str = "roomhold.backend.call_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter.
///
/// With an address, metrics are served over HTTP for scraping (requires a
/// running Tokio runtime). Without one, the recorder is installed in-process
/// and [`MetricsExporter::render`] returns the exposition text.
pub struct MetricsExporter {
    addr: Option<SocketAddr>,
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create a new exporter.
    #[must_use]
    pub const fn new(addr: Option<SocketAddr>) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the metrics and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (common in tests) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let installed = match self.addr {
            Some(addr) => builder
                .with_http_listener(addr)
                .install()
                .map(|()| None),
            None => builder.install_recorder().map(Some),
        };

        match installed {
            Ok(handle) => {
                self.handle = handle;
                match self.addr {
                    Some(addr) => tracing::info!(%addr, "Metrics available at http://{}/metrics", addr),
                    None => tracing::info!("Metrics recorder installed in-process"),
                }
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` when metrics are served over HTTP or the exporter
    /// hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(HOLDS_ACQUIRED, "Holds acquired from the reservation service");
    describe_counter!(HOLDS_RELEASED, "Holds released back to the reservation service");
    describe_counter!(HOLDS_FAILED, "Hold acquisitions that failed, by reason");
    describe_counter!(CART_ROLLBACKS, "Optimistic cart changes rolled back after a failed call");
    describe_counter!(SESSIONS_STARTED, "Booking sessions started");
    describe_counter!(SESSIONS_ENDED, "Booking sessions ended, by final status");
    describe_counter!(COUNTDOWN_EXPIRED, "Session countdowns that reached zero");
    describe_histogram!(BACKEND_CALL_DURATION, "Latency of reservation-service calls");
    describe_counter!("roomhold.store.actions", "Actions sent to a store");
    describe_histogram!("roomhold.store.reducer.duration_seconds", "Time spent in reducers");
}

/// Hold metrics recorder.
pub struct HoldMetrics;

impl HoldMetrics {
    /// Record a hold acquired.
    pub fn record_acquired() {
        counter!(HOLDS_ACQUIRED).increment(1);
    }

    /// Record holds released.
    pub fn record_released(count: usize) {
        counter!(HOLDS_RELEASED).increment(count as u64);
    }

    /// Record a failed acquisition.
    pub fn record_failed(reason: &'static str) {
        counter!(HOLDS_FAILED, "reason" => reason).increment(1);
    }

    /// Record a rolled-back cart change.
    pub fn record_rollback() {
        counter!(CART_ROLLBACKS).increment(1);
    }
}

/// Session metrics recorder.
pub struct SessionMetrics;

impl SessionMetrics {
    /// Record a session start.
    pub fn record_started() {
        counter!(SESSIONS_STARTED).increment(1);
    }

    /// Record a session ending with its final status.
    pub fn record_ended(status: &'static str) {
        counter!(SESSIONS_ENDED, "status" => status).increment(1);
    }

    /// Record a countdown reaching zero.
    pub fn record_countdown_expired() {
        counter!(COUNTDOWN_EXPIRED).increment(1);
    }
}

/// Reservation-service call recorder.
pub struct BackendMetrics;

impl BackendMetrics {
    /// Record the latency of one call.
    pub fn record_call(call: &'static str, duration: Duration) {
        histogram!(BACKEND_CALL_DURATION, "call" => call).record(duration.as_secs_f64());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_starts_unrendered() {
        let exporter = MetricsExporter::new(None);
        assert!(exporter.render().is_none());
    }

    #[test]
    fn test_in_process_exporter_renders_recorded_metrics() {
        let mut exporter = MetricsExporter::new(None);
        exporter.start().unwrap();

        HoldMetrics::record_acquired();

        // Another test may have installed the recorder first
        if let Some(text) = exporter.render() {
            assert!(text.contains("roomhold_holds_acquired"));
        }
    }

    #[test]
    fn test_recorders_without_installed_exporter_are_noops() {
        HoldMetrics::record_failed("capacity");
        SessionMetrics::record_ended("expired");
        BackendMetrics::record_call("acquire_hold", Duration::from_millis(5));
    }
}
