//! Inbound status subscriber.
//!
//! Consumes `event.status.changed` records and applies each one to the store
//! through the guarded `update_status` operation. Offsets are committed only
//! after the apply outcome is known:
//!
//! | Outcome                          | Commit | Effect                          |
//! |----------------------------------|--------|---------------------------------|
//! | applied / already at status      | yes    | status written (or nothing)     |
//! | malformed payload, bad id/status | yes    | logged and skipped              |
//! | unknown id, forbidden transition | yes    | logged and skipped              |
//! | store failure after retries      | no     | loop exits, message redelivered |
//!
//! Applying the same record twice is harmless, so redelivery after a crash
//! between apply and commit only costs a no-op write.

use std::sync::Arc;

use regpay_core::event::StatusChanged;
use regpay_core::event_bus::{EventBus, EventBusError, InboundMessage};
use regpay_core::registration::RegistrationStatus;
use regpay_core::store::{RegistrationStore, StatusOutcome, StoreError};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::{STATUS_EVENTS, counter};
use crate::retry::{RetryPolicy, retry_with_predicate};

/// Why the subscriber loop stopped.
#[derive(Error, Debug)]
pub enum SubscriberError {
    /// A status change could not be written; the message was not committed.
    #[error("Failed to apply status change to {registration_id}: {source}")]
    Apply {
        /// Target registration.
        registration_id: Uuid,
        /// Final store error.
        #[source]
        source: StoreError,
    },

    /// Subscribing, reading or committing failed.
    #[error("Event bus error: {0}")]
    Transport(#[from] EventBusError),
}

/// How a single message was handled. Every variant is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The registration moved to the requested status.
    Applied,
    /// The registration already had the requested status.
    Unchanged,
    /// The message cannot ever be applied and was dropped.
    Skipped,
}

/// Applies upstream status changes to registrations.
pub struct StatusSubscriber {
    bus: Arc<dyn EventBus>,
    store: Arc<dyn RegistrationStore>,
    topic: String,
    group: String,
    policy: RetryPolicy,
}

impl StatusSubscriber {
    /// Create a subscriber for `topic` in consumer group `group`.
    ///
    /// `policy` bounds the retries for transient store failures per message.
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Arc<dyn RegistrationStore>,
        topic: impl Into<String>,
        group: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            bus,
            store,
            topic: topic.into(),
            group: group.into(),
            policy,
        }
    }

    /// Consume until `shutdown` fires or the subscription closes.
    ///
    /// # Errors
    ///
    /// See [`StatusSubscriber::consume`].
    pub async fn run(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), SubscriberError> {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(topic = %self.topic, "Status subscriber received shutdown signal");
                Ok(())
            }
            result = self.consume() => result,
        }
    }

    /// Subscribe and process messages one at a time until the subscription
    /// closes.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError::Transport`] if the bus cannot be read or a
    /// commit fails, and [`SubscriberError::Apply`] if a store failure outlasts
    /// the retry policy. In both cases the current message stays uncommitted.
    pub async fn consume(&self) -> Result<(), SubscriberError> {
        let topics = [self.topic.as_str()];
        let mut subscription = self.bus.subscribe(&topics, &self.group).await?;
        info!(topic = %self.topic, group = %self.group, "Status subscriber started");

        while let Some(message) = subscription.next().await? {
            self.handle(&message).await?;
            subscription.commit(&message)?;
        }

        info!(topic = %self.topic, "Status subscription closed");
        Ok(())
    }

    /// Apply one message.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError::Apply`] when a transient store failure
    /// survives every retry.
    pub async fn handle(&self, message: &InboundMessage) -> Result<MessageOutcome, SubscriberError> {
        let (registration_id, status) = match parse(&message.payload) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %reason,
                    "Skipping malformed status message"
                );
                record("malformed");
                return Ok(MessageOutcome::Skipped);
            },
        };

        let result = retry_with_predicate(
            &self.policy,
            || self.store.update_status(registration_id, status),
            StoreError::is_transient,
        )
        .await;

        match result {
            Ok(StatusOutcome::Applied(_)) => {
                info!(%registration_id, %status, offset = message.offset, "Applied status change");
                record("applied");
                Ok(MessageOutcome::Applied)
            },
            Ok(StatusOutcome::Unchanged(_)) => {
                debug!(%registration_id, %status, "Status already applied");
                record("unchanged");
                Ok(MessageOutcome::Unchanged)
            },
            Err(err) if err.is_transient() => {
                error!(%registration_id, error = %err, "Giving up on status change");
                record("failed");
                Err(SubscriberError::Apply {
                    registration_id,
                    source: err,
                })
            },
            Err(err) => {
                warn!(%registration_id, %status, error = %err, "Skipping status change");
                record(match err {
                    StoreError::NotFound(_) => "not_found",
                    StoreError::InvalidTransition { .. } => "invalid_transition",
                    _ => "rejected",
                });
                Ok(MessageOutcome::Skipped)
            },
        }
    }
}

fn parse(payload: &[u8]) -> Result<(Uuid, RegistrationStatus), String> {
    let record = StatusChanged::from_bytes(payload).map_err(|e| e.to_string())?;
    let id = Uuid::parse_str(record.registration_id.trim())
        .map_err(|e| format!("invalid registration_id {:?}: {e}", record.registration_id))?;
    let status = RegistrationStatus::parse(&record.status).map_err(|e| e.to_string())?;
    Ok((id, status))
}

fn record(outcome: &'static str) {
    counter!(STATUS_EVENTS, "outcome" => outcome).increment(1);
}

/// Keep a subscriber running until `shutdown` fires.
///
/// After an error the subscriber is restarted following `restart`'s backoff;
/// the backoff resets once a run ends cleanly. A clean end (subscription
/// closed) is followed by `restart.initial_delay` before resubscribing.
pub async fn supervise(
    subscriber: StatusSubscriber,
    restart: RetryPolicy,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut attempt = 0usize;

    loop {
        let result = tokio::select! {
            _ = shutdown.recv() => break,
            result = subscriber.consume() => result,
        };

        let delay = match result {
            Ok(()) => {
                attempt = 0;
                restart.initial_delay
            },
            Err(err) => {
                let delay = restart.delay_for_attempt(attempt);
                error!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Status subscriber failed, restarting"
                );
                attempt = attempt.saturating_add(1);
                delay
            },
        };

        tokio::select! {
            _ = shutdown.recv() => break,
            () = sleep(delay) => {}
        }
    }

    info!("Status subscriber stopped");
}
