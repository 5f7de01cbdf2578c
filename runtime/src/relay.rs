//! Outbox relay.
//!
//! Moves committed outbox records onto the bus. Each pass reads the oldest
//! pending records, publishes each to the topic configured for its kind keyed
//! by registration id, and marks it published. A failed publish is counted on
//! the record and retried on a later pass. Once a record fails, later records
//! with the same key are left for the next pass so a registration's events
//! are never published out of order.
//!
//! ```text
//! handler ──tx──▶ registrations + outbox_events
//!                         │
//!              OutboxRelay::run_once (every poll_interval)
//!                         │
//!                         ▼
//!                   EventBus::publish(topic, registration_id, payload)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use regpay_core::event::EventKind;
use regpay_core::event_bus::EventBus;
use regpay_core::outbox::{OutboxRecord, OutboxStore};
use regpay_core::store::StoreError;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::metrics::{OUTBOX_FAILED, OUTBOX_PUBLISHED, counter};

/// Relay tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Pause between passes.
    pub poll_interval: Duration,
    /// Records read per pass.
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Records published and marked.
    pub published: usize,
    /// Records whose publish failed.
    pub failed: usize,
    /// Records skipped behind an earlier failure with the same key.
    pub deferred: usize,
}

impl RelayReport {
    /// True when the pass found nothing to do.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.published == 0 && self.failed == 0 && self.deferred == 0
    }
}

/// Publishes outbox records to the bus.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    topics: HashMap<EventKind, String>,
    config: RelayConfig,
}

impl OutboxRelay {
    /// Create a relay. `topics` maps each outbound kind to its topic name.
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        bus: Arc<dyn EventBus>,
        topics: HashMap<EventKind, String>,
        config: RelayConfig,
    ) -> Self {
        Self {
            outbox,
            bus,
            topics,
            config,
        }
    }

    /// Run a single pass over the pending records.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the outbox cannot be read or updated. Publish
    /// failures are not errors; they are recorded on the row and reported.
    pub async fn run_once(&self) -> Result<RelayReport, StoreError> {
        let records = self.outbox.pending(self.config.batch_size).await?;
        let mut report = RelayReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for record in records {
            if blocked.contains(&record.key) {
                report.deferred += 1;
                continue;
            }

            match self.publish(&record).await {
                Ok(topic) => {
                    self.outbox.mark_published(record.id).await?;
                    counter!(OUTBOX_PUBLISHED).increment(1);
                    report.published += 1;
                    debug!(
                        outbox_id = record.id,
                        registration_id = %record.key,
                        topic,
                        "Published outbox record"
                    );
                },
                Err(reason) => {
                    warn!(
                        outbox_id = record.id,
                        registration_id = %record.key,
                        attempts = record.attempts + 1,
                        error = %reason,
                        "Failed to publish outbox record"
                    );
                    self.outbox.mark_failed(record.id, &reason).await?;
                    counter!(OUTBOX_FAILED).increment(1);
                    report.failed += 1;
                    blocked.insert(record.key);
                },
            }
        }

        Ok(report)
    }

    async fn publish(&self, record: &OutboxRecord) -> Result<&str, String> {
        let topic = self
            .topics
            .get(&record.kind)
            .ok_or_else(|| format!("no topic configured for {}", record.kind.as_str()))?;
        let payload = record.payload.to_bytes().map_err(|e| e.to_string())?;
        self.bus
            .publish(topic, &record.key, &payload)
            .await
            .map_err(|e| e.to_string())?;
        Ok(topic)
    }

    /// Run passes every `poll_interval` until `shutdown` fires.
    ///
    /// Store errors are logged and the next pass tries again.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            batch_size = self.config.batch_size,
            "Outbox relay started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Outbox relay received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if !report.is_idle() => {
                            debug!(
                                published = report.published,
                                failed = report.failed,
                                deferred = report.deferred,
                                "Outbox relay pass"
                            );
                        },
                        Ok(_) => {},
                        Err(e) => error!(error = %e, "Outbox relay pass failed"),
                    }
                }
            }
        }

        info!("Outbox relay stopped");
    }
}
