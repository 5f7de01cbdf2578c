//! Registration and payment intake service.
//!
//! Accepts event registrations over HTTP, tracks their lifecycle
//! (`pending` to `confirmed` or `cancelled`) in Postgres, and announces every
//! lifecycle change on Redpanda through a transactional outbox. Upstream
//! `event.status.changed` messages are applied back to the registrations.
//!
//! # Modules
//!
//! - [`config`]: environment configuration
//! - [`api`]: HTTP handlers
//! - [`server`]: shared state and the router
//! - [`lifecycle`]: startup, background workers, graceful shutdown

pub mod api;
pub mod config;
pub mod lifecycle;
pub mod server;

pub use config::{Config, ConfigError, Topics};
pub use lifecycle::{Application, ApplicationError, Components};
pub use server::{AppState, build_router};
