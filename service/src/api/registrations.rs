//! Registration API endpoints.
//!
//! - POST /registrations - Create a registration (201)
//! - GET /registrations - List registrations, newest first
//! - GET /registrations/:id - Get one registration
//! - PUT /registrations/:id - Partial update; absent fields are kept
//! - POST /registrations/:id/cancel - Cancel with a reason (204)

#![allow(clippy::missing_errors_doc)] // Handlers return AppError; the mapping lives in regpay-web

use crate::server::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use regpay_core::registration::{ListQuery, NewRegistration, Registration, RegistrationPatch};
use regpay_web::{AppError, JsonBody, PathUuid, extractors::QueryParams};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

// ============================================================================
// Request Types
// ============================================================================

/// Query string for listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Page size (default 20, max 100)
    pub limit: Option<u32>,
    /// Rows to skip
    pub offset: Option<u32>,
    /// Only this event
    pub event_id: Option<Uuid>,
    /// Only this user
    pub user_id: Option<Uuid>,
}

impl From<ListParams> for ListQuery {
    fn from(params: ListParams) -> Self {
        Self::new(params.limit, params.offset)
            .for_event(params.event_id)
            .for_user(params.user_id)
    }
}

/// Body of a cancel request.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Why the registration is cancelled
    #[serde(default)]
    pub reason: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a registration.
///
/// # Endpoint
///
/// ```text
/// POST /registrations
/// Content-Type: application/json
///
/// {"event_id": "...", "full_name": "A", "gender": "F", "phone": "123", "email": "a@b.com"}
/// ```
///
/// Responds `201` with the stored registration (status `pending`).
pub async fn create_registration(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<NewRegistration>,
) -> Result<(StatusCode, Json<Registration>), AppError> {
    let registration = state.store.create(request).await?;

    info!(
        registration_id = %registration.registration_id,
        event_id = %registration.event_id,
        "Registration created"
    );

    Ok((StatusCode::CREATED, Json(registration)))
}

/// List registrations, newest first.
///
/// ```text
/// GET /registrations?limit=20&offset=0&event_id=...&user_id=...
/// ```
pub async fn list_registrations(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ListParams>,
) -> Result<Json<Vec<Registration>>, AppError> {
    let registrations = state.store.list(params.into()).await?;
    Ok(Json(registrations))
}

/// Get one registration.
pub async fn get_registration(
    State(state): State<AppState>,
    PathUuid(id): PathUuid,
) -> Result<Json<Registration>, AppError> {
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Registration", id))
}

/// Partially update a registration.
///
/// Fields missing from the body keep their stored value; `updated_at` always
/// moves forward.
pub async fn update_registration(
    State(state): State<AppState>,
    PathUuid(id): PathUuid,
    JsonBody(patch): JsonBody<RegistrationPatch>,
) -> Result<Json<Registration>, AppError> {
    let registration = state.store.update(id, patch).await?;
    info!(registration_id = %id, "Registration updated");
    Ok(Json(registration))
}

/// Cancel a registration.
///
/// Responds `204`. Repeating the call is a no-op that keeps the first reason;
/// cancelling a confirmed registration is `409`.
pub async fn cancel_registration(
    State(state): State<AppState>,
    PathUuid(id): PathUuid,
    JsonBody(request): JsonBody<CancelRequest>,
) -> Result<StatusCode, AppError> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_request("reason is required"));
    }

    let outcome = state.store.cancel(id, reason).await?;
    info!(registration_id = %id, changed = outcome.changed, "Registration cancelled");

    Ok(StatusCode::NO_CONTENT)
}
