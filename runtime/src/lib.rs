//! # Registration Payment Runtime
//!
//! Background workers for the registration-payment service.
//!
//! ## Core Components
//!
//! - **Outbox relay**: publishes committed outbox records to the bus ([`relay`])
//! - **Status subscriber**: applies upstream status changes with
//!   commit-after-apply semantics, plus a restarting supervisor ([`subscriber`])
//! - **Retry**: exponential backoff helpers ([`retry`])
//! - **Metrics**: Prometheus recorder and counter names ([`metrics`])
//!
//! ## Example
//!
//! ```ignore
//! use regpay_runtime::relay::{OutboxRelay, RelayConfig};
//! use regpay_runtime::subscriber::{StatusSubscriber, supervise};
//! use regpay_runtime::retry::RetryPolicy;
//!
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//!
//! let relay = OutboxRelay::new(outbox, bus.clone(), topics, RelayConfig::default());
//! tokio::spawn({
//!     let rx = shutdown_tx.subscribe();
//!     async move { relay.run(rx).await }
//! });
//!
//! let subscriber = StatusSubscriber::new(bus, store, "event.status.changed", "group", RetryPolicy::default());
//! tokio::spawn(supervise(subscriber, RetryPolicy::default(), shutdown_tx.subscribe()));
//! ```

pub mod metrics;
pub mod relay;
pub mod retry;
pub mod subscriber;

pub use relay::{OutboxRelay, RelayConfig, RelayReport};
pub use retry::RetryPolicy;
pub use subscriber::{MessageOutcome, StatusSubscriber, SubscriberError, supervise};
