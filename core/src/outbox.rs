//! Transactional outbox records.
//!
//! An outbox row is written in the same transaction as the state change that
//! produced it and stays pending until the relay has published it. Rows are
//! relayed oldest first; `attempts` and `last_error` record failed publishes.

use chrono::{DateTime, Utc};

use crate::event::{DomainEvent, EventKind};
use crate::store::StoreFuture;

/// A pending outbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// Monotonic row id; defines relay order.
    pub id: i64,
    /// Which configured topic to publish to.
    pub kind: EventKind,
    /// Partition key (the registration id).
    pub key: String,
    /// The event body.
    pub payload: DomainEvent,
    /// Failed publish attempts so far.
    pub attempts: i32,
    /// Most recent publish error.
    pub last_error: Option<String>,
    /// When the state change committed.
    pub created_at: DateTime<Utc>,
}

/// Relay-side access to the outbox.
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` unpublished records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on backend failure.
    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxRecord>>;

    /// Mark a record as published; it is never returned by `pending` again.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on backend failure.
    fn mark_published(&self, id: i64) -> StoreFuture<'_, ()>;

    /// Count a failed attempt and remember the error.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on backend failure.
    fn mark_failed<'a>(&'a self, id: i64, error: &'a str) -> StoreFuture<'a, ()>;
}
