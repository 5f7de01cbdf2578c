//! Payment API endpoints.
//!
//! - POST /registrations/:id/payment - Submit proof of payment (202)
//! - GET /registrations/:id/payment - Payment status derived from the registration
//! - PATCH /registrations/:id/payment/verify - Verify payment and confirm
//!
//! # Payment Flow
//!
//! 1. **Upload**: the registrant submits an amount and a proof URL;
//!    `payment.uploaded` is enqueued
//! 2. **Verify**: staff approve the proof; the registration becomes
//!    `confirmed` and `payment.verified` plus `registration.confirmed` are
//!    enqueued

#![allow(clippy::missing_errors_doc)] // Handlers return AppError; the mapping lives in regpay-web

use crate::server::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use regpay_core::registration::RegistrationStatus;
use regpay_web::{AppError, JsonBody, PathUuid};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Proof-of-payment submission.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadPaymentRequest {
    /// Amount paid; must be positive
    pub amount: f64,
    /// Where the receipt is stored
    pub payment_proof_url: String,
}

impl UploadPaymentRequest {
    fn validate(&self) -> Result<(), AppError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(AppError::validation("amount must be greater than zero"));
        }
        if self.payment_proof_url.trim().is_empty() {
            return Err(AppError::validation("payment_proof_url is required"));
        }
        Ok(())
    }
}

/// Simple `{"status": ...}` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// What happened
    pub status: String,
}

/// Payment status as seen by the registrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting verification
    Pending,
    /// Verified; the registration is confirmed
    Verified,
    /// The registration was cancelled
    Cancelled,
}

impl From<RegistrationStatus> for PaymentStatus {
    fn from(status: RegistrationStatus) -> Self {
        match status {
            RegistrationStatus::Pending => Self::Pending,
            RegistrationStatus::Confirmed => Self::Verified,
            RegistrationStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Nested payment details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Current payment status
    pub status: PaymentStatus,
}

/// Payment info response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfoResponse {
    /// Registration the payment belongs to
    pub registration_id: Uuid,
    /// Payment details
    pub payment: PaymentDetails,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit proof of payment.
///
/// ```text
/// POST /registrations/:id/payment
///
/// {"amount": 150000, "payment_proof_url": "https://files.example.com/receipt.jpg"}
/// ```
///
/// Responds `202 {"status": "payment uploaded"}`.
pub async fn upload_payment_proof(
    State(state): State<AppState>,
    PathUuid(id): PathUuid,
    JsonBody(request): JsonBody<UploadPaymentRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), AppError> {
    request.validate()?;

    state
        .store
        .record_payment_upload(id, request.amount, request.payment_proof_url.trim())
        .await?;

    info!(registration_id = %id, amount = request.amount, "Payment proof uploaded");

    Ok((
        StatusCode::ACCEPTED,
        Json(StatusResponse {
            status: "payment uploaded".to_string(),
        }),
    ))
}

/// Payment status for a registration.
pub async fn get_payment_info(
    State(state): State<AppState>,
    PathUuid(id): PathUuid,
) -> Result<Json<PaymentInfoResponse>, AppError> {
    let registration = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Registration", id))?;

    Ok(Json(PaymentInfoResponse {
        registration_id: registration.registration_id,
        payment: PaymentDetails {
            status: registration.status.into(),
        },
    }))
}

/// Verify payment and confirm the registration.
///
/// Responds `200 {"status": "verified"}`; verifying twice is harmless.
/// A cancelled registration cannot be verified (`409`).
pub async fn verify_payment(
    State(state): State<AppState>,
    PathUuid(id): PathUuid,
) -> Result<Json<StatusResponse>, AppError> {
    let outcome = state.store.verify_payment(id).await?;

    info!(registration_id = %id, changed = outcome.is_applied(), "Payment verified");

    Ok(Json(StatusResponse {
        status: "verified".to_string(),
    }))
}
