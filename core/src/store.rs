//! Registration store abstraction.
//!
//! The store owns all persisted state. Every mutating operation writes the
//! state change and the [`DomainEvent`](crate::event::DomainEvent)s it implies
//! in a single atomic unit (the transactional outbox), so an event exists if
//! and only if its state change committed. Publishing happens later, in the
//! outbox relay.
//!
//! # Status Guards
//!
//! `cancel`, `update_status` and `verify_payment` check the current status with
//! [`RegistrationStatus::transition`] inside the same atomic unit as the
//! write. Two concurrent field updates (`update`) are still last-write-wins;
//! there is no version column.
//!
//! # Implementations
//!
//! - `PostgresStore` (`regpay-postgres`) for production
//! - `InMemoryStore` (`regpay-testing`) for tests

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

use crate::registration::{
    InvalidTransition, ListQuery, NewRegistration, Registration, RegistrationPatch,
    RegistrationStatus,
};

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No registration with this identifier.
    #[error("Registration not found: {0}")]
    NotFound(Uuid),

    /// A live registration with the same event and email already exists.
    #[error("Duplicate registration: {0}")]
    Duplicate(String),

    /// The requested status change is not allowed.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: RegistrationStatus,
        /// Requested status.
        to: RegistrationStatus,
    },

    /// Unexpected failure in the backing store.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether retrying the same call could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<InvalidTransition> for StoreError {
    fn from(err: InvalidTransition) -> Self {
        Self::InvalidTransition {
            from: err.from,
            to: err.to,
        }
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    /// The registration after the call.
    pub registration: Registration,
    /// False when it was already cancelled; nothing was written.
    pub changed: bool,
}

/// Result of a guarded status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The status moved; contains the updated row.
    Applied(Registration),
    /// The registration already had the requested status.
    Unchanged(Registration),
}

impl StatusOutcome {
    /// The registration after the call.
    #[must_use]
    pub const fn registration(&self) -> &Registration {
        match self {
            Self::Applied(reg) | Self::Unchanged(reg) => reg,
        }
    }

    /// Whether anything was written.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence operations over registrations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so handlers and the subscriber can share an `Arc<dyn RegistrationStore>`.
pub trait RegistrationStore: Send + Sync {
    /// Insert a new `pending` registration and enqueue `registration.created`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Validation`] if required fields are missing
    /// - [`StoreError::Duplicate`] if the email is already registered for the event
    /// - [`StoreError::Database`] on backend failure
    fn create(&self, input: NewRegistration) -> StoreFuture<'_, Registration>;

    /// Point lookup. A missing id is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn get(&self, id: Uuid) -> StoreFuture<'_, Option<Registration>>;

    /// Page of registrations, newest `created_at` first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn list(&self, query: ListQuery) -> StoreFuture<'_, Vec<Registration>>;

    /// Coalesce `patch` onto the row and refresh `updated_at`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Validation`] if a present field is blank or malformed
    /// - [`StoreError::NotFound`] if the id doesn't exist
    /// - [`StoreError::Database`] on backend failure
    fn update(&self, id: Uuid, patch: RegistrationPatch) -> StoreFuture<'_, Registration>;

    /// Cancel with a reason and enqueue `registration.cancelled`.
    ///
    /// Cancelling an already-cancelled registration succeeds without touching
    /// the stored reason or timestamp.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the id doesn't exist
    /// - [`StoreError::InvalidTransition`] if the registration is confirmed
    /// - [`StoreError::Database`] on backend failure
    fn cancel<'a>(&'a self, id: Uuid, reason: &'a str) -> StoreFuture<'a, CancelOutcome>;

    /// Guarded status change driven by upstream events.
    ///
    /// Becoming `cancelled` stamps `cancelled_at`; becoming `confirmed` or
    /// `cancelled` enqueues the matching announcement.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the id doesn't exist
    /// - [`StoreError::InvalidTransition`] if the lifecycle forbids it
    /// - [`StoreError::Database`] on backend failure
    fn update_status(&self, id: Uuid, status: RegistrationStatus) -> StoreFuture<'_, StatusOutcome>;

    /// Enqueue `payment.uploaded` for an existing registration.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the id doesn't exist
    /// - [`StoreError::Database`] on backend failure
    fn record_payment_upload<'a>(
        &'a self,
        id: Uuid,
        amount: f64,
        payment_proof_url: &'a str,
    ) -> StoreFuture<'a, ()>;

    /// Confirm a pending registration after payment verification.
    ///
    /// Enqueues `payment.verified` and `registration.confirmed` when the status
    /// moves; verifying a confirmed registration is a no-op.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the id doesn't exist
    /// - [`StoreError::InvalidTransition`] if the registration is cancelled
    /// - [`StoreError::Database`] on backend failure
    fn verify_payment(&self, id: Uuid) -> StoreFuture<'_, StatusOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_database_errors_are_transient() {
        assert!(StoreError::Database("connection reset".to_string()).is_transient());
        assert!(!StoreError::NotFound(Uuid::nil()).is_transient());
        assert!(!StoreError::Validation("x".to_string()).is_transient());
        assert!(
            !StoreError::InvalidTransition {
                from: RegistrationStatus::Confirmed,
                to: RegistrationStatus::Pending,
            }
            .is_transient()
        );
    }

    #[test]
    fn invalid_transition_converts() {
        let err: StoreError = RegistrationStatus::Confirmed
            .transition(RegistrationStatus::Cancelled)
            .map(|_| ())
            .map_err(StoreError::from)
            .err()
            .unwrap_or(StoreError::Database(String::new()));
        assert_eq!(err.to_string(), "Invalid status transition: confirmed -> cancelled");
    }
}
