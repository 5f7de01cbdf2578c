//! Redpanda event bus for the registration-payment service.
//!
//! Implements [`EventBus`] from `regpay-core` with rdkafka, so it works
//! against Redpanda or any other Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! **Producer**: idempotent, `acks=all` by default. Messages are keyed by the
//! caller (the registration id), so every event for one registration lands on
//! the same partition in publish order.
//!
//! **Consumer**: at-least-once with manual commits. Auto-commit is disabled;
//! the caller commits each message through [`Subscription::commit`] once it
//! has been handled. Anything not committed is redelivered to the group after
//! a restart or rebalance.
//!
//! # Example
//!
//! ```no_run
//! use regpay_redpanda::RedpandaEventBus;
//! use regpay_core::event_bus::EventBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::new("localhost:19093")?;
//! bus.publish("registration.created", "3f1c...", br#"{"event":"registration.created"}"#).await?;
//!
//! let mut subscription = bus.subscribe(&["event.status.changed"], "registration-payment-service").await?;
//! while let Some(message) = subscription.next().await? {
//!     println!("offset {}", message.offset);
//!     subscription.commit(&message)?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use regpay_core::event_bus::{
    BusFuture, EventBus, EventBusError, InboundMessage, Subscription, validate_topic,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::time::Duration;

const DEFAULT_ACKS: &str = "all";
const DEFAULT_COMPRESSION: &str = "none";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_OFFSET_RESET: &str = "earliest";

/// Redpanda event bus implementation.
///
/// Holds one shared producer. Each [`EventBus::subscribe`] call creates its
/// own consumer, owned by the returned [`RedpandaSubscription`].
///
/// # Example
///
/// ```no_run
/// use regpay_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("localhost:19093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Debug, Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Upper bound for a single publish.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where a group with no committed offset starts reading.
    ///
    /// Default: `"earliest"`, so status changes published before the first
    /// deployment are not skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are missing or
    /// the producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or(DEFAULT_ACKS);
        let compression = self.compression.as_deref().unwrap_or(DEFAULT_COMPRESSION);
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let timeout_ms = timeout.as_millis().to_string();

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", &timeout_ms)
            .set("acks", acks)
            .set("enable.idempotence", "true")
            .set("compression.type", compression)
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            auto_offset_reset,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish<'a>(&'a self, topic: &'a str, key: &'a str, payload: &'a [u8]) -> BusFuture<'a, ()> {
        Box::pin(async move {
            validate_topic(topic)?;

            let record = FutureRecord::to(topic).payload(payload).key(key);
            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic, key, partition, offset, "Message published");
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic, key, error = %kafka_error, "Failed to publish message");
                    Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe<'a>(
        &'a self,
        topics: &'a [&'a str],
        group: &'a str,
    ) -> BusFuture<'a, Box<dyn Subscription>> {
        Box::pin(async move {
            let owned_topics = || topics.iter().map(|t| (*t).to_string()).collect::<Vec<_>>();
            for topic in topics {
                validate_topic(topic)?;
            }

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: owned_topics(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(topics)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: owned_topics(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );

            Ok(Box::new(RedpandaSubscription { consumer }) as Box<dyn Subscription>)
        })
    }
}

/// Subscription backed by an rdkafka [`StreamConsumer`].
///
/// Dropping it leaves the consumer group; uncommitted messages are then
/// redelivered to the next member.
pub struct RedpandaSubscription {
    consumer: StreamConsumer,
}

impl Subscription for RedpandaSubscription {
    fn next(&mut self) -> BusFuture<'_, Option<InboundMessage>> {
        Box::pin(async move {
            match self.consumer.recv().await {
                Ok(message) => {
                    let inbound = detach(&message);
                    tracing::trace!(
                        topic = %inbound.topic,
                        partition = inbound.partition,
                        offset = inbound.offset,
                        "Received message"
                    );
                    Ok(Some(inbound))
                },
                Err(e) => Err(EventBusError::TransportError(format!(
                    "Failed to receive message: {e}"
                ))),
            }
        })
    }

    fn commit(&mut self, message: &InboundMessage) -> Result<(), EventBusError> {
        let commit_failed = |reason: String| EventBusError::CommitFailed {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason,
        };

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
            .map_err(|e| commit_failed(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| commit_failed(e.to_string()))?;

        tracing::trace!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Offset committed"
        );
        Ok(())
    }
}

/// Copy a borrowed message out of the consumer's buffer.
fn detach(message: &BorrowedMessage<'_>) -> InboundMessage {
    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}
