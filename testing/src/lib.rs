//! # Registration Payment Testing
//!
//! Testing utilities for the registration-payment service.
//!
//! This crate provides:
//! - [`InMemoryStore`]: registration store + outbox with the full contract
//! - [`InMemoryEventBus`]: topic logs, consumer-group offsets, failure injection
//! - Deterministic clocks
//! - Fixtures for common inputs
//!
//! ## Example
//!
//! ```ignore
//! use regpay_testing::{InMemoryEventBus, InMemoryStore, fixtures};
//!
//! #[tokio::test]
//! async fn relays_created_event() {
//!     let store = InMemoryStore::new();
//!     let bus = InMemoryEventBus::new();
//!     store.create(fixtures::new_registration()).await?;
//!     relay(&store, &bus).run_once().await?;
//!     assert_eq!(bus.published().len(), 1);
//! }
//! ```

pub mod event_bus;
pub mod store;

use chrono::{DateTime, Utc};
use regpay_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use regpay_testing::mocks::FixedClock;
    /// use regpay_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default(),
        )
    }
}

/// Ready-made inputs.
pub mod fixtures {
    use regpay_core::registration::NewRegistration;
    use uuid::Uuid;

    /// A valid create input for a fresh event, so repeated calls never collide.
    #[must_use]
    pub fn new_registration() -> NewRegistration {
        new_registration_for(Uuid::new_v4())
    }

    /// A valid create input for `event_id`.
    #[must_use]
    pub fn new_registration_for(event_id: Uuid) -> NewRegistration {
        NewRegistration {
            event_id,
            user_id: None,
            full_name: "A".to_string(),
            gender: "F".to_string(),
            phone: "123".to_string(),
            email: "a@b.com".to_string(),
            address: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            emergency_contact_relation: None,
            special_needs: None,
        }
    }
}

// Re-export commonly used items
pub use event_bus::{InMemoryEventBus, PublishedMessage};
pub use mocks::{FixedClock, test_clock};
pub use store::InMemoryStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn fixtures_are_valid() {
        assert_eq!(fixtures::new_registration().validate(), Ok(()));
    }
}
