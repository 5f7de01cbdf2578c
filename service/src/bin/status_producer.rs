//! Manual test producer for `event.status.changed`.
//!
//! Sends `count` status records keyed `"{id}-{n}"` so the running service's
//! subscriber can be exercised end to end.
//!
//! ```text
//! status-producer --broker localhost:19093 --id 3f1c0d1e-... --status confirmed
//! ```

use chrono::Utc;
use clap::Parser;
use regpay_core::event::StatusChanged;
use regpay_core::event_bus::EventBus;
use regpay_redpanda::RedpandaEventBus;
use std::time::Duration;

/// Publish status-change records to Redpanda.
#[derive(Debug, Parser)]
#[command(name = "status-producer", version, about)]
struct Args {
    /// Kafka broker address
    #[arg(long, default_value = "localhost:19093")]
    broker: String,

    /// Topic to publish to
    #[arg(long, default_value = "event.status.changed")]
    topic: String,

    /// Registration id prefix; each message gets `-{n}` appended
    #[arg(long, default_value = "REG-001")]
    id: String,

    /// Status to send (pending, confirmed, cancelled)
    #[arg(long, default_value = "confirmed")]
    status: String,

    /// Number of messages to send
    #[arg(long, default_value_t = 1)]
    count: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let bus = RedpandaEventBus::new(&args.broker)?;

    println!("Broker: {}", args.broker);
    println!("Topic: {}", args.topic);
    println!("Sending {} message(s)...\n", args.count);

    let mut sent = 0u32;
    for n in 1..=args.count {
        let record = StatusChanged::new(format!("{}-{n}", args.id), args.status.clone(), Utc::now());
        let payload = record.to_bytes()?;

        match bus.publish(&args.topic, &record.registration_id, &payload).await {
            Ok(()) => {
                sent += 1;
                println!("Message {n} sent: {}", String::from_utf8_lossy(&payload));
            },
            Err(e) => eprintln!("Failed to send message {n}: {e}"),
        }

        if n < args.count {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    println!("\nSent {sent} of {} message(s) to topic '{}'", args.count, args.topic);
    Ok(())
}
