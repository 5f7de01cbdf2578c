//! In-memory message bus.
//!
//! Models the parts of a Kafka-compatible broker the service relies on: one
//! append-only log per topic (single partition), per-group committed offsets,
//! and redelivery of everything after the last commit when a group
//! re-subscribes. Failures can be injected on both the publish and read paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use regpay_core::event_bus::{
    BusFuture, EventBus, EventBusError, InboundMessage, Subscription, validate_topic,
};
use std::collections::{HashMap, VecDeque};
use std::future;
use std::sync::{Arc, Mutex};

/// A message accepted by [`InMemoryEventBus::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Destination topic.
    pub topic: String,
    /// Partition key.
    pub key: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Payload parsed as JSON, for assertions.
    #[must_use]
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Default)]
struct BusState {
    logs: HashMap<String, Vec<InboundMessage>>,
    published: Vec<PublishedMessage>,
    /// (group, topic) → next offset to read.
    committed: HashMap<(String, String), i64>,
    publish_failures: usize,
    read_errors: VecDeque<EventBusError>,
}

impl BusState {
    fn append(&mut self, topic: &str, key: Option<Vec<u8>>, payload: Vec<u8>) {
        let log = self.logs.entry(topic.to_string()).or_default();
        let offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
        log.push(InboundMessage {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key,
            payload,
        });
    }
}

/// In-memory [`EventBus`].
///
/// # Example
///
/// ```
/// use regpay_testing::InMemoryEventBus;
/// use regpay_core::event_bus::EventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("registration.created", "reg-1", b"{}").await?;
///
/// let mut sub = bus.subscribe(&["registration.created"], "test-group").await?;
/// let msg = sub.next().await?.ok_or("empty")?;
/// sub.commit(&msg)?;
/// assert_eq!(bus.committed_offset("test-group", "registration.created"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message as an external producer would, bypassing `publish`
    /// bookkeeping and failure injection.
    pub fn inject(&self, topic: &str, key: &str, payload: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .append(topic, Some(key.as_bytes().to_vec()), payload.into());
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().unwrap().publish_failures = count;
    }

    /// Make the next read on any subscription return `error`.
    pub fn fail_next_read(&self, error: EventBusError) {
        self.state.lock().unwrap().read_errors.push_back(error);
    }

    /// Everything successfully published, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Published messages for one topic.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published().into_iter().filter(|m| m.topic == topic).collect()
    }

    /// Next offset `group` will read from `topic`.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str) -> i64 {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(&'a self, topic: &'a str, key: &'a str, payload: &'a [u8]) -> BusFuture<'a, ()> {
        let result = validate_topic(topic).and_then(|()| {
            let mut state = self.state.lock().unwrap();
            if state.publish_failures > 0 {
                state.publish_failures -= 1;
                return Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            state.append(topic, Some(key.as_bytes().to_vec()), payload.to_vec());
            state.published.push(PublishedMessage {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.to_vec(),
            });
            Ok(())
        });
        Box::pin(future::ready(result))
    }

    fn subscribe<'a>(
        &'a self,
        topics: &'a [&'a str],
        group: &'a str,
    ) -> BusFuture<'a, Box<dyn Subscription>> {
        let result = topics
            .iter()
            .try_for_each(|t| validate_topic(t))
            .map(|()| {
                let state = self.state.lock().unwrap();
                let cursors = topics
                    .iter()
                    .map(|t| {
                        let key = (group.to_string(), (*t).to_string());
                        ((*t).to_string(), state.committed.get(&key).copied().unwrap_or(0))
                    })
                    .collect();
                Box::new(InMemorySubscription {
                    state: Arc::clone(&self.state),
                    group: group.to_string(),
                    cursors,
                }) as Box<dyn Subscription>
            });
        Box::pin(future::ready(result))
    }
}

/// Subscription handed out by [`InMemoryEventBus`].
///
/// Reads from the committed position of its group at subscribe time. When
/// every log is drained, `next` returns `Ok(None)`.
pub struct InMemorySubscription {
    state: Arc<Mutex<BusState>>,
    group: String,
    /// (topic, next offset to read)
    cursors: Vec<(String, i64)>,
}

impl Subscription for InMemorySubscription {
    fn next(&mut self) -> BusFuture<'_, Option<InboundMessage>> {
        let mut state = self.state.lock().unwrap();
        let result = if let Some(err) = state.read_errors.pop_front() {
            Err(err)
        } else {
            let mut found = None;
            for (topic, position) in &mut self.cursors {
                let message = state
                    .logs
                    .get(topic.as_str())
                    .and_then(|log| log.get(usize::try_from(*position).unwrap_or(usize::MAX)));
                if let Some(message) = message {
                    *position += 1;
                    found = Some(message.clone());
                    break;
                }
            }
            Ok(found)
        };
        drop(state);
        Box::pin(future::ready(result))
    }

    fn commit(&mut self, message: &InboundMessage) -> Result<(), EventBusError> {
        let mut state = self.state.lock().unwrap();
        let key = (self.group.clone(), message.topic.clone());
        let next = message.offset + 1;
        let entry = state.committed.entry(key).or_insert(0);
        if next > *entry {
            *entry = next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_appends_to_topic_log() {
        let bus = InMemoryEventBus::new();
        bus.publish("a", "k1", b"one").await.unwrap();
        bus.publish("b", "k2", b"two").await.unwrap();

        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published_to("a")[0].key, "k1");
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let bus = InMemoryEventBus::new();
        let err = bus.publish("", "k", b"x").await.unwrap_err();
        assert_eq!(err, EventBusError::InvalidTopic(String::new()));
    }

    #[tokio::test]
    async fn injected_publish_failures_are_consumed() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);

        assert!(bus.publish("a", "k", b"x").await.is_err());
        assert!(bus.publish("a", "k", b"x").await.is_ok());
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered_to_the_group() {
        let bus = InMemoryEventBus::new();
        bus.inject("t", "k", "m0");
        bus.inject("t", "k", "m1");

        let mut sub = bus.subscribe(&["t"], "g").await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        sub.commit(&first).unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.payload, b"m1");
        // second is never committed

        let mut again = bus.subscribe(&["t"], "g").await.unwrap();
        let redelivered = again.next().await.unwrap().unwrap();
        assert_eq!(redelivered.offset, 1);
        assert!(again.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn groups_track_offsets_independently() {
        let bus = InMemoryEventBus::new();
        bus.inject("t", "k", "m0");

        let mut a = bus.subscribe(&["t"], "a").await.unwrap();
        let msg = a.next().await.unwrap().unwrap();
        a.commit(&msg).unwrap();

        assert_eq!(bus.committed_offset("a", "t"), 1);
        assert_eq!(bus.committed_offset("b", "t"), 0);
    }
}
