//! Router configuration.
//!
//! Builds the complete Axum router with all endpoints.

use super::state::AppState;
use crate::api::{payments, registrations};
use axum::{
    Router,
    extract::State,
    routing::{get, patch, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use regpay_web::{AppError, correlation_id_layer, handlers::health_check};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the complete Axum router.
///
/// ```text
/// GET    /health
/// GET    /metrics
/// POST   /registrations
/// GET    /registrations
/// GET    /registrations/:id
/// PUT    /registrations/:id
/// POST   /registrations/:id/cancel
/// POST   /registrations/:id/payment
/// GET    /registrations/:id/payment
/// PATCH  /registrations/:id/payment/verify
/// ```
///
/// Every request is bounded by `request_timeout` (408 on expiry), tagged with
/// a correlation id and logged by `TraceLayer`.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .route(
            "/registrations",
            post(registrations::create_registration).get(registrations::list_registrations),
        )
        .route(
            "/registrations/:id",
            get(registrations::get_registration).put(registrations::update_registration),
        )
        .route("/registrations/:id/cancel", post(registrations::cancel_registration))
        .route(
            "/registrations/:id/payment",
            post(payments::upload_payment_proof).get(payments::get_payment_info),
        )
        .route("/registrations/:id/payment/verify", patch(payments::verify_payment))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn render_metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or_else(|| AppError::not_found("Metrics recorder", "default"))
}
