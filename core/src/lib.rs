//! # Registration Payment Core
//!
//! Domain types and service traits for the registration-payment service.
//!
//! This crate has no I/O. It defines:
//!
//! - **Registration**: the entity, its forward-only status lifecycle and the
//!   create/patch/list inputs ([`registration`])
//! - **Events**: the outbound envelope and the inbound status record ([`event`])
//! - **Store**: persistence with a transactional outbox ([`store`], [`outbox`])
//! - **Event bus**: keyed publish and manual-commit subscription ([`event_bus`])
//! - **Environment**: injectable clock ([`environment`])
//!
//! ## Example
//!
//! ```
//! use regpay_core::registration::{RegistrationStatus, Transition};
//!
//! let next = RegistrationStatus::Pending.transition(RegistrationStatus::Confirmed);
//! assert_eq!(next, Ok(Transition::Applied(RegistrationStatus::Confirmed)));
//!
//! // Terminal states never move.
//! assert!(RegistrationStatus::Cancelled
//!     .transition(RegistrationStatus::Confirmed)
//!     .is_err());
//! ```

pub mod event;
pub mod event_bus;
pub mod outbox;
pub mod registration;
pub mod store;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

/// Environment module - injectable dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use regpay_core::environment::{Clock, SystemClock};
    ///
    /// let before = chrono::Utc::now();
    /// assert!(SystemClock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
