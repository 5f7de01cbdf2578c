//! Row types and their conversion into domain values.

use chrono::{DateTime, Utc};
use regpay_core::event::{DomainEvent, EventKind};
use regpay_core::outbox::OutboxRecord;
use regpay_core::registration::{Registration, RegistrationStatus};
use regpay_core::store::StoreError;
use sqlx::types::Json;
use uuid::Uuid;

/// Column list shared by every query that returns a registration.
pub(crate) const REGISTRATION_COLUMNS: &str = "registration_id, event_id, user_id, full_name, \
     gender, phone, email, address, emergency_contact_name, emergency_contact_phone, \
     emergency_contact_relation, special_needs, registration_date, status, cancelled_at, \
     cancellation_reason, notes, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RegistrationRow {
    registration_id: Uuid,
    event_id: Uuid,
    user_id: Option<Uuid>,
    full_name: String,
    gender: String,
    phone: String,
    email: String,
    address: Option<String>,
    emergency_contact_name: Option<String>,
    emergency_contact_phone: Option<String>,
    emergency_contact_relation: Option<String>,
    special_needs: Option<String>,
    registration_date: DateTime<Utc>,
    status: String,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = StoreError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        let status = RegistrationStatus::parse(&row.status)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            registration_id: row.registration_id,
            event_id: row.event_id,
            user_id: row.user_id,
            full_name: row.full_name,
            gender: row.gender,
            phone: row.phone,
            email: row.email,
            address: row.address,
            emergency_contact_name: row.emergency_contact_name,
            emergency_contact_phone: row.emergency_contact_phone,
            emergency_contact_relation: row.emergency_contact_relation,
            special_needs: row.special_needs,
            registration_date: row.registration_date,
            status,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OutboxRow {
    id: i64,
    topic_kind: String,
    message_key: String,
    payload: Json<serde_json::Value>,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl OutboxRow {
    pub(crate) const fn id(&self) -> i64 {
        self.id
    }
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let kind = EventKind::parse(&row.topic_kind)
            .map_err(|e| StoreError::Database(format!("outbox row {}: {e}", row.id)))?;
        let payload = serde_json::from_value::<DomainEvent>(row.payload.0)
            .map_err(|e| StoreError::Database(format!("outbox row {}: undecodable payload: {e}", row.id)))?;

        Ok(Self {
            id: row.id,
            kind,
            key: row.message_key,
            payload,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
        })
    }
}
