//! In-memory registration store with an outbox.
//!
//! Honours the same contract as the Postgres store: guarded transitions,
//! idempotent cancel, strictly increasing `updated_at`, duplicate detection on
//! `(event_id, lower(email))` among live registrations, and one outbox record
//! per emitted event written under the same lock as the state change.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Utc};
use regpay_core::environment::{Clock, SystemClock};
use regpay_core::event::DomainEvent;
use regpay_core::outbox::{OutboxRecord, OutboxStore};
use regpay_core::registration::{
    ListQuery, NewRegistration, Registration, RegistrationPatch, RegistrationStatus, Transition,
    next_updated_at,
};
use regpay_core::store::{CancelOutcome, RegistrationStore, StatusOutcome, StoreError, StoreFuture};
use std::future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    /// Insertion order is kept; listing sorts by `created_at` on top of it.
    registrations: Vec<Registration>,
    outbox: Vec<OutboxRecord>,
    published: Vec<i64>,
    next_outbox_id: i64,
}

impl Inner {
    fn find_mut(&mut self, id: Uuid) -> Result<&mut Registration, StoreError> {
        self.registrations
            .iter_mut()
            .find(|r| r.registration_id == id)
            .ok_or(StoreError::NotFound(id))
    }

    fn enqueue(&mut self, event: DomainEvent, key: Uuid, at: DateTime<Utc>) {
        self.next_outbox_id += 1;
        self.outbox.push(OutboxRecord {
            id: self.next_outbox_id,
            kind: event.event,
            key: key.to_string(),
            payload: event,
            attempts: 0,
            last_error: None,
            created_at: at,
        });
    }
}

/// In-memory [`RegistrationStore`] + [`OutboxStore`].
///
/// # Example
///
/// ```
/// use regpay_testing::{InMemoryStore, fixtures};
/// use regpay_core::store::RegistrationStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// let reg = store.create(fixtures::new_registration()).await?;
/// assert_eq!(store.outbox_len(), 1);
/// assert!(store.get(reg.registration_id).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    failures: Arc<AtomicUsize>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store on a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` mutating calls fail with [`StoreError::Database`].
    pub fn fail_next_writes(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Snapshot of every registration, in insertion order.
    #[must_use]
    pub fn registrations(&self) -> Vec<Registration> {
        self.inner.lock().unwrap().registrations.clone()
    }

    /// Every outbox record ever written, published or not.
    #[must_use]
    pub fn outbox(&self) -> Vec<OutboxRecord> {
        self.inner.lock().unwrap().outbox.clone()
    }

    /// Number of outbox records ever written.
    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.inner.lock().unwrap().outbox.len()
    }

    /// Ids marked as published, in marking order.
    #[must_use]
    pub fn published_ids(&self) -> Vec<i64> {
        self.inner.lock().unwrap().published.clone()
    }

    fn injected_failure(&self) -> Option<StoreError> {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| StoreError::Database("injected failure".to_string()))
    }

    fn write<T>(&self, op: impl FnOnce(&mut Inner, DateTime<Utc>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        op(&mut inner, now)
    }

    fn guarded_status(
        &self,
        id: Uuid,
        status: RegistrationStatus,
        events: impl FnOnce(Uuid, DateTime<Utc>) -> Vec<DomainEvent>,
    ) -> Result<StatusOutcome, StoreError> {
        self.write(|inner, now| {
            let reg = inner.find_mut(id)?;
            match reg.status.transition(status)? {
                Transition::Unchanged => Ok(StatusOutcome::Unchanged(reg.clone())),
                Transition::Applied(next) => {
                    reg.status = next;
                    if next == RegistrationStatus::Cancelled {
                        reg.cancelled_at = Some(now);
                    }
                    reg.updated_at = next_updated_at(reg.updated_at, now);
                    let updated = reg.clone();
                    for event in events(id, now) {
                        inner.enqueue(event, id, now);
                    }
                    Ok(StatusOutcome::Applied(updated))
                },
            }
        })
    }
}

impl RegistrationStore for InMemoryStore {
    fn create(&self, input: NewRegistration) -> StoreFuture<'_, Registration> {
        let result = input.validate().map_err(StoreError::Validation).and_then(|()| {
            self.write(|inner, now| {
                let email = input.email.to_lowercase();
                let duplicate = inner.registrations.iter().any(|r| {
                    r.event_id == input.event_id
                        && r.status != RegistrationStatus::Cancelled
                        && r.email.to_lowercase() == email
                });
                if duplicate {
                    return Err(StoreError::Duplicate(format!(
                        "{} is already registered for event {}",
                        input.email, input.event_id
                    )));
                }

                let reg = input.into_registration(Uuid::new_v4(), now);
                inner.registrations.push(reg.clone());
                inner.enqueue(DomainEvent::registration_created(&reg, now), reg.registration_id, now);
                Ok(reg)
            })
        });
        Box::pin(future::ready(result))
    }

    fn get(&self, id: Uuid) -> StoreFuture<'_, Option<Registration>> {
        let found = self
            .inner
            .lock()
            .unwrap()
            .registrations
            .iter()
            .find(|r| r.registration_id == id)
            .cloned();
        Box::pin(future::ready(Ok(found)))
    }

    fn list(&self, query: ListQuery) -> StoreFuture<'_, Vec<Registration>> {
        let mut rows: Vec<Registration> = self
            .inner
            .lock()
            .unwrap()
            .registrations
            .iter()
            .rev()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        // Stable sort keeps newest-inserted first among equal timestamps.
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let page = rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect();
        Box::pin(future::ready(Ok(page)))
    }

    fn update(&self, id: Uuid, patch: RegistrationPatch) -> StoreFuture<'_, Registration> {
        let result = patch.validate().map_err(StoreError::Validation).and_then(|()| {
            self.write(|inner, now| {
                let reg = inner.find_mut(id)?;
                patch.apply_to(reg);
                reg.updated_at = next_updated_at(reg.updated_at, now);
                Ok(reg.clone())
            })
        });
        Box::pin(future::ready(result))
    }

    fn cancel<'a>(&'a self, id: Uuid, reason: &'a str) -> StoreFuture<'a, CancelOutcome> {
        let result = self.write(|inner, now| {
            let reg = inner.find_mut(id)?;
            match reg.status.transition(RegistrationStatus::Cancelled)? {
                Transition::Unchanged => Ok(CancelOutcome {
                    registration: reg.clone(),
                    changed: false,
                }),
                Transition::Applied(next) => {
                    reg.status = next;
                    reg.cancelled_at = Some(now);
                    reg.cancellation_reason = Some(reason.to_string());
                    reg.updated_at = next_updated_at(reg.updated_at, now);
                    let registration = reg.clone();
                    inner.enqueue(DomainEvent::registration_cancelled(id, Some(reason), now), id, now);
                    Ok(CancelOutcome {
                        registration,
                        changed: true,
                    })
                },
            }
        });
        Box::pin(future::ready(result))
    }

    fn update_status(&self, id: Uuid, status: RegistrationStatus) -> StoreFuture<'_, StatusOutcome> {
        let result = self.guarded_status(id, status, |id, now| {
            DomainEvent::for_status(id, status, now).into_iter().collect()
        });
        Box::pin(future::ready(result))
    }

    fn record_payment_upload<'a>(
        &'a self,
        id: Uuid,
        amount: f64,
        payment_proof_url: &'a str,
    ) -> StoreFuture<'a, ()> {
        let result = self.write(|inner, now| {
            inner.find_mut(id)?;
            inner.enqueue(DomainEvent::payment_uploaded(id, amount, payment_proof_url, now), id, now);
            Ok(())
        });
        Box::pin(future::ready(result))
    }

    fn verify_payment(&self, id: Uuid) -> StoreFuture<'_, StatusOutcome> {
        let result = self.guarded_status(id, RegistrationStatus::Confirmed, |id, now| {
            vec![
                DomainEvent::payment_verified(id, now),
                DomainEvent::registration_confirmed(id, now),
            ]
        });
        Box::pin(future::ready(result))
    }
}

impl OutboxStore for InMemoryStore {
    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxRecord>> {
        let result = if let Some(err) = self.injected_failure() {
            Err(err)
        } else {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .outbox
                .iter()
                .filter(|r| !inner.published.contains(&r.id))
                .take(limit)
                .cloned()
                .collect())
        };
        Box::pin(future::ready(result))
    }

    fn mark_published(&self, id: i64) -> StoreFuture<'_, ()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.published.contains(&id) {
            inner.published.push(id);
        }
        Box::pin(future::ready(Ok(())))
    }

    fn mark_failed<'a>(&'a self, id: i64, error: &'a str) -> StoreFuture<'a, ()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.outbox.iter_mut().find(|r| r.id == id) {
            record.attempts += 1;
            record.last_error = Some(error.to_string());
        }
        Box::pin(future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::mocks::test_clock;
    use regpay_core::event::EventKind;

    fn kinds(store: &InMemoryStore) -> Vec<EventKind> {
        store.outbox().iter().map(|r| r.kind).collect()
    }

    #[tokio::test]
    async fn create_starts_pending_and_enqueues_created() {
        let store = InMemoryStore::new();
        let reg = store.create(fixtures::new_registration()).await.unwrap();

        assert_eq!(reg.status, RegistrationStatus::Pending);
        assert_eq!(kinds(&store), vec![EventKind::RegistrationCreated]);
        assert_eq!(store.outbox()[0].key, reg.registration_id.to_string());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email_for_same_event() {
        let store = InMemoryStore::new();
        let input = fixtures::new_registration();
        store.create(input.clone()).await.unwrap();

        let mut again = input.clone();
        again.email = again.email.to_uppercase();
        assert!(matches!(store.create(again).await, Err(StoreError::Duplicate(_))));
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn cancelled_registration_frees_the_email() {
        let store = InMemoryStore::new();
        let input = fixtures::new_registration();
        let reg = store.create(input.clone()).await.unwrap();
        store.cancel(reg.registration_id, "changed plans").await.unwrap();

        assert!(store.create(input).await.is_ok());
    }

    #[tokio::test]
    async fn updated_at_increases_under_a_frozen_clock() {
        let store = InMemoryStore::with_clock(Arc::new(test_clock()));
        let reg = store.create(fixtures::new_registration()).await.unwrap();

        let first = store
            .update(reg.registration_id, RegistrationPatch::default())
            .await
            .unwrap();
        let second = store
            .update(reg.registration_id, RegistrationPatch::default())
            .await
            .unwrap();

        assert!(first.updated_at > reg.updated_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn verify_payment_enqueues_verified_then_confirmed() {
        let store = InMemoryStore::new();
        let reg = store.create(fixtures::new_registration()).await.unwrap();

        let outcome = store.verify_payment(reg.registration_id).await.unwrap();
        assert!(outcome.is_applied());
        assert_eq!(
            kinds(&store),
            vec![
                EventKind::RegistrationCreated,
                EventKind::PaymentVerified,
                EventKind::RegistrationConfirmed,
            ]
        );

        let again = store.verify_payment(reg.registration_id).await.unwrap();
        assert!(!again.is_applied());
        assert_eq!(store.outbox_len(), 3);
    }

    #[tokio::test]
    async fn pending_skips_published_records() {
        let store = InMemoryStore::new();
        store.create(fixtures::new_registration()).await.unwrap();
        store.create(fixtures::new_registration()).await.unwrap();

        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        store.mark_published(pending[0].id).await.unwrap();

        let remaining = store.pending(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, pending[1].id);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryStore::new();
        store.fail_next_writes(1);

        assert!(matches!(
            store.create(fixtures::new_registration()).await,
            Err(StoreError::Database(_))
        ));
        assert!(store.create(fixtures::new_registration()).await.is_ok());
    }
}
