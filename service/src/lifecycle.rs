//! Application lifecycle management and graceful shutdown.
//!
//! [`Application`] owns every long-lived resource of the service: the
//! connection pool and producer (through the store and bus handles), the TCP
//! listener and the background workers. Nothing is global; dropping the
//! application releases all of it.
//!
//! 1. **Startup**: connect, migrate, bind, build the router
//! 2. **Runtime**: serve HTTP while the outbox relay and the supervised status
//!    subscriber run in the background
//! 3. **Shutdown**: on Ctrl+C or SIGTERM stop accepting connections, broadcast
//!    shutdown, and give the workers `SHUTDOWN_TIMEOUT_SECS` to finish
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let app = Application::build(config).await?;
//! app.run().await?;
//! ```

use crate::config::Config;
use crate::server::{AppState, build_router};
use metrics_exporter_prometheus::PrometheusHandle;
use regpay_core::event_bus::{EventBus, EventBusError};
use regpay_core::outbox::OutboxStore;
use regpay_core::store::{RegistrationStore, StoreError};
use regpay_postgres::PostgresStore;
use regpay_redpanda::RedpandaEventBus;
use regpay_runtime::metrics::install_recorder;
use regpay_runtime::{OutboxRelay, RelayConfig, RetryPolicy, StatusSubscriber, supervise};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Backoff between subscriber restarts.
const RESTART_POLICY: RetryPolicy = RetryPolicy::builder()
    .initial_delay(Duration::from_secs(1))
    .max_delay(Duration::from_secs(30))
    .build();

/// Errors that stop the application from starting or serving.
#[derive(Error, Debug)]
pub enum ApplicationError {
    /// Connecting to or migrating the database failed.
    #[error("Database setup failed: {0}")]
    Database(#[from] StoreError),

    /// The event bus could not be created.
    #[error("Event bus setup failed: {0}")]
    EventBus(#[from] EventBusError),

    /// Binding or serving the HTTP listener failed.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Store and bus handles the application runs on.
///
/// Production builds these from Postgres and Redpanda; tests pass in-memory
/// doubles.
pub struct Components {
    /// Registration store used by handlers and the subscriber
    pub store: Arc<dyn RegistrationStore>,
    /// Outbox read by the relay; usually the same object as `store`
    pub outbox: Arc<dyn OutboxStore>,
    /// Event bus for the relay and the subscriber
    pub bus: Arc<dyn EventBus>,
    /// Prometheus handle for `/metrics`
    pub metrics: Option<PrometheusHandle>,
}

/// Running application with all background tasks.
pub struct Application {
    /// TCP listener for HTTP server
    listener: TcpListener,

    /// Axum router with all HTTP routes
    router: axum::Router,

    /// Outbox relay (spawned on run)
    relay: OutboxRelay,

    /// Status subscriber (spawned under a supervisor on run)
    subscriber: StatusSubscriber,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,

    /// Grace period for background tasks
    shutdown_timeout: Duration,
}

impl Application {
    /// Connect to Postgres and Redpanda, run migrations, install the metrics
    /// recorder and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError`] if the database is unreachable, a
    /// migration fails, the producer cannot be created or the address cannot
    /// be bound.
    pub async fn build(config: Config) -> Result<Self, ApplicationError> {
        info!(
            brokers = %config.kafka.brokers,
            max_connections = config.postgres.max_connections,
            "Connecting to Postgres and Redpanda"
        );

        let store = PostgresStore::connect(&config.postgres).await?;
        store.migrate().await?;
        let store = Arc::new(store);

        let bus = RedpandaEventBus::builder()
            .brokers(&config.kafka.brokers)
            .build()?;

        let metrics = match install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Metrics disabled");
                None
            },
        };

        let components = Components {
            store: store.clone(),
            outbox: store,
            bus: Arc::new(bus),
            metrics,
        };

        Self::with_components(config, components).await
    }

    /// Bind the listener and wire the router and workers over `components`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError::Io`] if the address cannot be bound.
    pub async fn with_components(
        config: Config,
        components: Components,
    ) -> Result<Self, ApplicationError> {
        let Components {
            store,
            outbox,
            bus,
            metrics,
        } = components;

        let listener = TcpListener::bind(config.server.address()).await?;

        let mut state = AppState::new(store.clone());
        if let Some(handle) = metrics {
            state = state.with_metrics(handle);
        }
        let router = build_router(state, config.server.request_timeout);

        let relay = OutboxRelay::new(
            outbox,
            bus.clone(),
            config.kafka.topics.outbound(),
            RelayConfig {
                poll_interval: config.outbox.poll_interval,
                batch_size: config.outbox.batch_size,
            },
        );

        let subscriber = StatusSubscriber::new(
            bus,
            store,
            config.kafka.topics.event_status_changed.clone(),
            config.kafka.consumer_group.clone(),
            RetryPolicy::default(),
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            listener,
            router,
            relay,
            subscriber,
            shutdown_tx,
            shutdown_timeout: config.server.shutdown_timeout,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError::Io`] if the HTTP server fails.
    pub async fn run(self) -> Result<(), ApplicationError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`ApplicationError::Io`] if the HTTP server fails.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ApplicationError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            router,
            relay,
            subscriber,
            shutdown_tx,
            shutdown_timeout,
        } = self;

        info!("Starting outbox relay and status subscriber");
        let relay_rx = shutdown_tx.subscribe();
        let relay_handle = tokio::spawn(async move { relay.run(relay_rx).await });
        let subscriber_handle = tokio::spawn(supervise(
            subscriber,
            RESTART_POLICY,
            shutdown_tx.subscribe(),
        ));

        info!(address = %listener.local_addr()?, "HTTP server listening for requests");
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown...");

        // Send shutdown signal to all background tasks
        let _ = shutdown_tx.send(());

        await_shutdown(
            shutdown_timeout,
            [("outbox_relay", relay_handle), ("status_subscriber", subscriber_handle)],
        )
        .await;

        served?;
        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Wait for background tasks, giving each `timeout` to finish.
async fn await_shutdown(timeout: Duration, handles: [(&'static str, JoinHandle<()>); 2]) {
    for (task, handle) in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(task, "Task stopped gracefully"),
            Ok(Err(e)) => warn!(task, error = %e, "Task failed"),
            Err(_) => warn!(task, "Task shutdown timed out"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed, that signal is never reported.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
