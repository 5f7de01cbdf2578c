//! Registration-payment HTTP server.
//!
//! Serves the registration API, relays the outbox to Redpanda and applies
//! upstream status changes until Ctrl+C or SIGTERM.

use regpay_service::{Application, Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; real deployments set the environment.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,regpay=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting registration-payment service");

    let config = Config::from_env()?;
    info!(
        address = %config.server.address(),
        brokers = %config.kafka.brokers,
        consumer_group = %config.kafka.consumer_group,
        status_topic = %config.kafka.topics.event_status_changed,
        "Configuration loaded"
    );

    let app = Application::build(config).await?;
    app.run().await?;

    Ok(())
}
