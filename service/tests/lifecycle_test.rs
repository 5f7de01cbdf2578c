//! End-to-end lifecycle test over in-memory doubles.
//!
//! Starts the full application (HTTP listener, outbox relay, supervised
//! status subscriber), waits for both background paths to do their work, then
//! triggers shutdown and checks it completes cleanly.

#![allow(clippy::expect_used)] // Integration tests can use expect for setup
#![allow(clippy::unwrap_used)]

use chrono::Utc;
use regpay_core::event::StatusChanged;
use regpay_core::registration::RegistrationStatus;
use regpay_core::store::RegistrationStore;
use regpay_service::{Application, Components, Config};
use regpay_testing::{InMemoryEventBus, InMemoryStore, fixtures};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

fn test_config() -> Config {
    let vars: HashMap<&str, &str> = [
        ("APP_HOST", "127.0.0.1"),
        ("APP_PORT", "0"),
        ("OUTBOX_POLL_INTERVAL_MS", "10"),
        ("SHUTDOWN_TIMEOUT_SECS", "2"),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|key| vars.get(key).map(ToString::to_string)).expect("valid config")
}

async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn application_relays_outbox_and_applies_status_changes() {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();

    let reg = store
        .create(fixtures::new_registration_for(Uuid::new_v4()))
        .await
        .expect("create");
    let change = StatusChanged::new(reg.registration_id.to_string(), "confirmed", Utc::now());
    bus.inject(
        "event.status.changed",
        &reg.registration_id.to_string(),
        change.to_bytes().expect("encode"),
    );

    let components = Components {
        store: Arc::new(store.clone()),
        outbox: Arc::new(store.clone()),
        bus: Arc::new(bus.clone()),
        metrics: None,
    };
    let app = Application::with_components(test_config(), components)
        .await
        .expect("application builds");
    assert_ne!(app.local_addr().expect("bound").port(), 0);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(app.run_until(async move {
        let _ = stop_rx.await;
    }));

    wait_for(|| !bus.published_to("registration.created").is_empty()).await;
    wait_for(|| {
        store
            .registrations()
            .iter()
            .any(|r| r.status == RegistrationStatus::Confirmed)
    })
    .await;

    // The confirmation itself goes through the outbox too.
    wait_for(|| !bus.published_to("registration.confirmed").is_empty()).await;

    let created = &bus.published_to("registration.created")[0];
    assert_eq!(created.key, reg.registration_id.to_string());
    assert_eq!(created.json()["event"], "registration.created");
    assert_eq!(
        bus.committed_offset("registration-payment-service", "event.status.changed"),
        1
    );

    stop_tx.send(()).expect("application still running");
    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("shutdown in time")
        .expect("task joins");
    assert!(result.is_ok());
}
