//! HTTP handlers for the registration and payment endpoints.
//!
//! Handlers only talk to the registration store. Lifecycle events are written
//! to the outbox by the store in the same transaction as the state change and
//! published later by the relay, so a broker outage never changes a response.

pub mod payments;
pub mod registrations;
