//! Message bus abstraction.
//!
//! The bus is a set of named, ordered append-logs (topics). Producers append
//! keyed messages; the key picks the partition, so all messages for one
//! registration keep their relative order. Consumers read through a named
//! consumer group and commit offsets explicitly.
//!
//! # Delivery Semantics
//!
//! ```text
//!  HTTP write ──► registrations + outbox_events (one transaction)
//!                          │
//!                          ▼
//!                   outbox relay ──publish(topic, key)──► bus
//!
//!  bus ──next()──► status subscriber ──apply──► store ──► commit()
//! ```
//!
//! - **Publish**: at-least-once. The relay retries until the broker acks, so a
//!   message may be appended twice; downstream consumers must be idempotent.
//! - **Subscribe**: at-least-once. Offsets are committed only after the
//!   message has been fully handled, so a crash before commit redelivers it.
//!
//! # Implementations
//!
//! - `RedpandaEventBus` (`regpay-redpanda`) for Kafka-compatible brokers
//! - `InMemoryEventBus` (`regpay-testing`) for tests

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the bus or build a client.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to append a message to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit a consumed offset.
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    CommitFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },

    /// Topic name is empty or otherwise unusable.
    #[error("Invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Network or transport error while reading.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// One message pulled from a subscription, detached from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message key, if any.
    pub key: Option<Vec<u8>>,
    /// Raw payload. Empty when the producer sent none.
    pub payload: Vec<u8>,
}

/// Boxed future returned by bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// A live consumer-group membership.
///
/// Reads are sequential: `next` yields one message, the caller handles it,
/// then calls `commit` with that message before (or instead of) moving on.
pub trait Subscription: Send {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` when the subscription has been closed and will not
    /// yield more messages.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::TransportError`] if the broker cannot be read.
    fn next(&mut self) -> BusFuture<'_, Option<InboundMessage>>;

    /// Commit `message` so the group resumes after it.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the offset cannot be stored.
    fn commit(&mut self, message: &InboundMessage) -> Result<(), EventBusError>;
}

/// Trait for message bus implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so that the service can hold an `Arc<dyn EventBus>` and swap the broker for
/// an in-memory bus in tests.
pub trait EventBus: Send + Sync {
    /// Append `payload` to `topic`, keyed by `key`.
    ///
    /// Safe to retry: a retried publish may produce a duplicate, never a loss.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::InvalidTopic`] for an empty topic and
    /// [`EventBusError::PublishFailed`] if the broker rejects or times out.
    fn publish<'a>(&'a self, topic: &'a str, key: &'a str, payload: &'a [u8]) -> BusFuture<'a, ()>;

    /// Join `group` and subscribe to `topics`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the consumer cannot be
    /// created or the topics cannot be subscribed.
    fn subscribe<'a>(
        &'a self,
        topics: &'a [&'a str],
        group: &'a str,
    ) -> BusFuture<'a, Box<dyn Subscription>>;
}

/// Reject empty topic names before they reach a client.
///
/// # Errors
///
/// Returns [`EventBusError::InvalidTopic`] if `topic` is blank.
pub fn validate_topic(topic: &str) -> Result<(), EventBusError> {
    if topic.trim().is_empty() {
        return Err(EventBusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_failed_display() {
        let err = EventBusError::PublishFailed {
            topic: "registration.created".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Publish failed for topic 'registration.created': broker down"
        );
    }

    #[test]
    fn blank_topics_are_invalid() {
        assert!(validate_topic("").is_err());
        assert!(validate_topic("   ").is_err());
        assert!(validate_topic("payment.verified").is_ok());
    }

    #[test]
    fn traits_are_object_safe() {
        fn assert_dyn(_: Option<&dyn EventBus>, _: Option<&dyn Subscription>) {}
        assert_dyn(None, None);
    }
}
