//! Axum integration for the registration-payment service.
//!
//! The service binary owns its routes and state; this crate holds the pieces
//! every handler shares:
//!
//! - [`AppError`]: store errors and extractor rejections as `{"code", "message"}`
//!   JSON responses
//! - [`extractors`]: `JsonBody` and `PathUuid`, which reject with [`AppError`]
//!   instead of axum's plain-text bodies
//! - [`middleware`]: correlation id per request, echoed in `X-Correlation-ID`
//! - [`handlers`]: the liveness probe
//!
//! # Request Flow
//!
//! 1. **Correlation id** is read or generated and a request span opened
//! 2. **Extract** path id and JSON body, rejecting malformed input with 400
//! 3. **Call** the registration store
//! 4. **Map** the result or [`StoreError`](regpay_core::store::StoreError) to a response
//!
//! # Example
//!
//! ```ignore
//! use regpay_web::{AppError, JsonBody, PathUuid};
//!
//! async fn update_registration(
//!     State(state): State<AppState>,
//!     PathUuid(id): PathUuid,
//!     JsonBody(patch): JsonBody<RegistrationPatch>,
//! ) -> Result<Json<Registration>, AppError> {
//!     Ok(Json(state.store.update(id, patch).await?))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{CorrelationId, JsonBody, PathUuid};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
