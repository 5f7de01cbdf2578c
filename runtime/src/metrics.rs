//! Prometheus metrics for the background workers.
//!
//! Counters recorded here:
//! - `regpay_outbox_published_total`: outbox records published
//! - `regpay_outbox_failed_total`: failed publish attempts
//! - `regpay_status_events_total{outcome}`: inbound status messages by outcome
//!
//! # Example
//!
//! ```rust,no_run
//! use regpay_runtime::metrics::install_recorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_recorder()?;
//! println!("{}", handle.render());
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub use metrics::counter;

/// Outbox records published.
pub const OUTBOX_PUBLISHED: &str = "regpay_outbox_published_total";
/// Failed outbox publish attempts.
pub const OUTBOX_FAILED: &str = "regpay_outbox_failed_total";
/// Inbound status messages, labelled by `outcome`.
pub const STATUS_EVENTS: &str = "regpay_status_events_total";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The Prometheus recorder could not be installed.
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Install the global Prometheus recorder and describe every counter.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    describe();
    tracing::info!("Metrics recorder installed");
    Ok(handle)
}

/// Register counter descriptions with the current recorder.
pub fn describe() {
    describe_counter!(OUTBOX_PUBLISHED, "Outbox records published to the bus");
    describe_counter!(OUTBOX_FAILED, "Failed outbox publish attempts");
    describe_counter!(STATUS_EVENTS, "Inbound status messages by outcome");
}
