//! `PostgreSQL` registration store for the registration-payment service.
//!
//! Implements [`RegistrationStore`] and [`OutboxStore`] from `regpay-core` on
//! top of a sqlx connection pool:
//!
//! - Every mutation runs in one transaction together with the
//!   `outbox_events` rows it emits
//! - Guarded status changes lock the row with `SELECT ... FOR UPDATE` before
//!   checking the transition
//! - A partial unique index on `(event_id, lower(email))` rejects a second
//!   live registration; the violation surfaces as [`StoreError::Duplicate`]
//! - Schema changes ship as sqlx migrations in `./migrations`
//!
//! # Example
//!
//! ```ignore
//! use regpay_postgres::{PostgresConfig, PostgresStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect(&PostgresConfig::new("postgres://localhost/regpay_db")).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

mod rows;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use regpay_core::environment::{Clock, SystemClock};
use regpay_core::event::DomainEvent;
use regpay_core::outbox::{OutboxRecord, OutboxStore};
use regpay_core::registration::{
    ListQuery, NewRegistration, Registration, RegistrationPatch, RegistrationStatus, Transition,
    next_updated_at,
};
use regpay_core::store::{CancelOutcome, RegistrationStore, StatusOutcome, StoreError, StoreFuture};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::rows::{OutboxRow, REGISTRATION_COLUMNS, RegistrationRow};

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection string.
    pub url: String,
    /// Pool upper bound.
    pub max_connections: u32,
    /// Connections kept open when idle.
    pub min_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
    /// Close connections idle for longer than this.
    pub idle_timeout: Option<Duration>,
}

impl PostgresConfig {
    /// Settings for `url` with the service defaults.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// `PostgreSQL`-backed [`RegistrationStore`] and [`OutboxStore`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresStore {
    /// Open a pool and check that the database answers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot connect.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        let store = Self::from_pool(pool);
        store.ping().await?;
        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(store)
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Round-trip a trivial query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Park an outbox row this binary cannot decode so it stops occupying
    /// relay batches. The row keeps its payload for manual inspection.
    async fn dead_letter(&self, id: i64, error: &str) -> Result<(), StoreError> {
        warn!(outbox_id = id, error, "Dead-lettering undecodable outbox row");
        sqlx::query(
            "UPDATE outbox_events \
             SET dead_lettered_at = now(), attempts = attempts + 1, last_error = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Current time at the column precision (microseconds).
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    async fn create_registration(&self, input: NewRegistration) -> Result<Registration, StoreError> {
        input.validate().map_err(StoreError::Validation)?;
        let now = self.now();
        let new = input.into_registration(Uuid::new_v4(), now);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let sql = format!(
            "INSERT INTO registrations ({REGISTRATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             RETURNING {REGISTRATION_COLUMNS}"
        );
        let row: RegistrationRow = sqlx::query_as(&sql)
            .bind(new.registration_id)
            .bind(new.event_id)
            .bind(new.user_id)
            .bind(&new.full_name)
            .bind(&new.gender)
            .bind(&new.phone)
            .bind(&new.email)
            .bind(&new.address)
            .bind(&new.emergency_contact_name)
            .bind(&new.emergency_contact_phone)
            .bind(&new.emergency_contact_relation)
            .bind(&new.special_needs)
            .bind(new.registration_date)
            .bind(new.status.as_str())
            .bind(new.cancelled_at)
            .bind(&new.cancellation_reason)
            .bind(&new.notes)
            .bind(new.created_at)
            .bind(new.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let created = Registration::try_from(row)?;

        enqueue(
            &mut tx,
            &DomainEvent::registration_created(&created, now),
            created.registration_id,
            now,
        )
        .await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(registration_id = %created.registration_id, event_id = %created.event_id, "Registration created");
        Ok(created)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Registration>, StoreError> {
        let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE registration_id = $1");
        sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(Registration::try_from)
            .transpose()
    }

    async fn fetch_page(&self, query: ListQuery) -> Result<Vec<Registration>, StoreError> {
        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE ($1::uuid IS NULL OR event_id = $1) \
               AND ($2::uuid IS NULL OR user_id = $2) \
             ORDER BY created_at DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(query.event_id)
            .bind(query.user_id)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(Registration::try_from)
            .collect()
    }

    async fn patch_registration(&self, id: Uuid, patch: RegistrationPatch) -> Result<Registration, StoreError> {
        patch.validate().map_err(StoreError::Validation)?;
        let now = self.now();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut reg = lock_registration(&mut tx, id).await?;
        patch.apply_to(&mut reg);
        reg.updated_at = next_updated_at(reg.updated_at, now);

        let sql = format!(
            "UPDATE registrations SET \
                full_name = $2, phone = $3, email = $4, address = $5, \
                emergency_contact_name = $6, emergency_contact_phone = $7, \
                emergency_contact_relation = $8, special_needs = $9, notes = $10, \
                updated_at = $11 \
             WHERE registration_id = $1 \
             RETURNING {REGISTRATION_COLUMNS}"
        );
        let row: RegistrationRow = sqlx::query_as(&sql)
            .bind(id)
            .bind(&reg.full_name)
            .bind(&reg.phone)
            .bind(&reg.email)
            .bind(&reg.address)
            .bind(&reg.emergency_contact_name)
            .bind(&reg.emergency_contact_phone)
            .bind(&reg.emergency_contact_relation)
            .bind(&reg.special_needs)
            .bind(&reg.notes)
            .bind(reg.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Registration::try_from(row)
    }

    async fn cancel_registration(&self, id: Uuid, reason: &str) -> Result<CancelOutcome, StoreError> {
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut reg = lock_registration(&mut tx, id).await?;

        match reg.status.transition(RegistrationStatus::Cancelled)? {
            Transition::Unchanged => {
                tx.rollback().await.map_err(map_sqlx_error)?;
                Ok(CancelOutcome {
                    registration: reg,
                    changed: false,
                })
            },
            Transition::Applied(next) => {
                reg.status = next;
                reg.cancelled_at = Some(now);
                reg.cancellation_reason = Some(reason.to_string());
                reg.updated_at = next_updated_at(reg.updated_at, now);
                let registration = write_status(&mut tx, &reg).await?;
                enqueue(&mut tx, &DomainEvent::registration_cancelled(id, Some(reason), now), id, now).await?;
                tx.commit().await.map_err(map_sqlx_error)?;

                debug!(registration_id = %id, "Registration cancelled");
                Ok(CancelOutcome {
                    registration,
                    changed: true,
                })
            },
        }
    }

    async fn guarded_status<F>(&self, id: Uuid, status: RegistrationStatus, events: F) -> Result<StatusOutcome, StoreError>
    where
        F: FnOnce(Uuid, DateTime<Utc>) -> Vec<DomainEvent> + Send,
    {
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut reg = lock_registration(&mut tx, id).await?;

        match reg.status.transition(status)? {
            Transition::Unchanged => {
                tx.rollback().await.map_err(map_sqlx_error)?;
                Ok(StatusOutcome::Unchanged(reg))
            },
            Transition::Applied(next) => {
                reg.status = next;
                if next == RegistrationStatus::Cancelled {
                    reg.cancelled_at = Some(now);
                }
                reg.updated_at = next_updated_at(reg.updated_at, now);
                let updated = write_status(&mut tx, &reg).await?;
                for event in events(id, now) {
                    enqueue(&mut tx, &event, id, now).await?;
                }
                tx.commit().await.map_err(map_sqlx_error)?;

                debug!(registration_id = %id, status = %next, "Registration status changed");
                Ok(StatusOutcome::Applied(updated))
            },
        }
    }

    async fn payment_upload(&self, id: Uuid, amount: f64, payment_proof_url: &str) -> Result<(), StoreError> {
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        lock_registration(&mut tx, id).await?;
        enqueue(
            &mut tx,
            &DomainEvent::payment_uploaded(id, amount, payment_proof_url, now),
            id,
            now,
        )
        .await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(registration_id = %id, amount, "Payment proof recorded");
        Ok(())
    }
}

impl RegistrationStore for PostgresStore {
    fn create(&self, input: NewRegistration) -> StoreFuture<'_, Registration> {
        Box::pin(self.create_registration(input))
    }

    fn get(&self, id: Uuid) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(self.fetch(id))
    }

    fn list(&self, query: ListQuery) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(self.fetch_page(query))
    }

    fn update(&self, id: Uuid, patch: RegistrationPatch) -> StoreFuture<'_, Registration> {
        Box::pin(self.patch_registration(id, patch))
    }

    fn cancel<'a>(&'a self, id: Uuid, reason: &'a str) -> StoreFuture<'a, CancelOutcome> {
        Box::pin(self.cancel_registration(id, reason))
    }

    fn update_status(&self, id: Uuid, status: RegistrationStatus) -> StoreFuture<'_, StatusOutcome> {
        Box::pin(self.guarded_status(id, status, move |id, now| {
            DomainEvent::for_status(id, status, now).into_iter().collect()
        }))
    }

    fn record_payment_upload<'a>(
        &'a self,
        id: Uuid,
        amount: f64,
        payment_proof_url: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.payment_upload(id, amount, payment_proof_url))
    }

    fn verify_payment(&self, id: Uuid) -> StoreFuture<'_, StatusOutcome> {
        Box::pin(self.guarded_status(id, RegistrationStatus::Confirmed, |id, now| {
            vec![
                DomainEvent::payment_verified(id, now),
                DomainEvent::registration_confirmed(id, now),
            ]
        }))
    }
}

impl OutboxStore for PostgresStore {
    fn pending(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxRecord>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, OutboxRow>(
                "SELECT id, topic_kind, message_key, payload, attempts, last_error, created_at \
                 FROM outbox_events \
                 WHERE published_at IS NULL AND dead_lettered_at IS NULL \
                 ORDER BY id \
                 LIMIT $1",
            )
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let id = row.id();
                match OutboxRecord::try_from(row) {
                    Ok(record) => records.push(record),
                    Err(e) => self.dead_letter(id, &e.to_string()).await?,
                }
            }
            Ok(records)
        })
    }

    fn mark_published(&self, id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE outbox_events SET published_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
    }

    fn mark_failed<'a>(&'a self, id: i64, error: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE outbox_events SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
                .bind(id)
                .bind(error)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
    }
}

/// Load a registration and hold its row lock until the transaction ends.
async fn lock_registration(conn: &mut PgConnection, id: Uuid) -> Result<Registration, StoreError> {
    let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE registration_id = $1 FOR UPDATE");
    let row = sqlx::query_as::<_, RegistrationRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(StoreError::NotFound(id))?;
    Registration::try_from(row)
}

async fn write_status(conn: &mut PgConnection, reg: &Registration) -> Result<Registration, StoreError> {
    let sql = format!(
        "UPDATE registrations SET status = $2, cancelled_at = $3, cancellation_reason = $4, updated_at = $5 \
         WHERE registration_id = $1 \
         RETURNING {REGISTRATION_COLUMNS}"
    );
    let row: RegistrationRow = sqlx::query_as(&sql)
        .bind(reg.registration_id)
        .bind(reg.status.as_str())
        .bind(reg.cancelled_at)
        .bind(&reg.cancellation_reason)
        .bind(reg.updated_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Registration::try_from(row)
}

async fn enqueue(
    conn: &mut PgConnection,
    event: &DomainEvent,
    key: Uuid,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO outbox_events (topic_kind, message_key, payload, created_at) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(event.event.as_str())
    .bind(key.to_string())
    .bind(Json(event))
    .bind(at)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Translate a driver error. Unique violations become
/// [`StoreError::Duplicate`]; everything else is [`StoreError::Database`].
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate("email is already registered for this event".to_string())
        },
        sqlx::Error::RowNotFound => StoreError::Database("row vanished during update".to_string()),
        _ => StoreError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = PostgresConfig::new("postgres://localhost/regpay_db");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn row_not_found_is_a_database_error() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(err.is_transient());
    }

    #[test]
    fn pool_errors_are_transient() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Database(_)));
    }
}
