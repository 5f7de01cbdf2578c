//! Application state for the HTTP server.

use metrics_exporter_prometheus::PrometheusHandle;
use regpay_core::store::RegistrationStore;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via Arc) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Registration store; every mutation also writes its outbox events
    pub store: Arc<dyn RegistrationStore>,

    /// Prometheus render handle, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state without a metrics endpoint.
    #[must_use]
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
