//! Wire events exchanged with the message bus.
//!
//! Outbound events share one envelope, `{"event": <name>, "data": {...}}`, where
//! `data` always carries `registration_id` and an RFC-3339 UTC `timestamp`.
//! There is no schema version field; consumers must tolerate extra keys.
//!
//! The single inbound event, [`StatusChanged`], is a flat record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::registration::{Registration, RegistrationStatus};

/// Error types for event encoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize an event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event name encountered.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Every event name the service produces or consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A registration was created.
    #[serde(rename = "registration.created")]
    RegistrationCreated,
    /// A registration was cancelled.
    #[serde(rename = "registration.cancelled")]
    RegistrationCancelled,
    /// Proof of payment was submitted.
    #[serde(rename = "payment.uploaded")]
    PaymentUploaded,
    /// Payment was verified.
    #[serde(rename = "payment.verified")]
    PaymentVerified,
    /// A registration was confirmed.
    #[serde(rename = "registration.confirmed")]
    RegistrationConfirmed,
    /// Upstream status change (inbound only).
    #[serde(rename = "event.status.changed")]
    EventStatusChanged,
}

impl EventKind {
    /// All kinds, outbound first.
    pub const ALL: [Self; 6] = [
        Self::RegistrationCreated,
        Self::RegistrationCancelled,
        Self::PaymentUploaded,
        Self::PaymentVerified,
        Self::RegistrationConfirmed,
        Self::EventStatusChanged,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationCreated => "registration.created",
            Self::RegistrationCancelled => "registration.cancelled",
            Self::PaymentUploaded => "payment.uploaded",
            Self::PaymentVerified => "payment.verified",
            Self::RegistrationConfirmed => "registration.confirmed",
            Self::EventStatusChanged => "event.status.changed",
        }
    }

    /// Parse a wire name.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventType`] for anything else.
    pub fn parse(s: &str) -> Result<Self, EventError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format a timestamp the way every payload carries it (`2025-01-01T00:00:00Z`).
#[must_use]
pub fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Outbound event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Event name.
    pub event: EventKind,
    /// Event-specific fields, always including `registration_id` and `timestamp`.
    pub data: Value,
}

impl DomainEvent {
    /// `registration.created` for a freshly inserted row.
    #[must_use]
    pub fn registration_created(registration: &Registration, at: DateTime<Utc>) -> Self {
        Self {
            event: EventKind::RegistrationCreated,
            data: json!({
                "registration_id": registration.registration_id,
                "event_id": registration.event_id,
                "user_id": registration.user_id,
                "full_name": registration.full_name,
                "gender": registration.gender,
                "status": registration.status,
                "timestamp": rfc3339(at),
            }),
        }
    }

    /// `registration.cancelled`. `reason` is absent when cancelled upstream.
    #[must_use]
    pub fn registration_cancelled(
        registration_id: Uuid,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: EventKind::RegistrationCancelled,
            data: json!({
                "registration_id": registration_id,
                "reason": reason,
                "timestamp": rfc3339(at),
            }),
        }
    }

    /// `payment.uploaded`.
    #[must_use]
    pub fn payment_uploaded(
        registration_id: Uuid,
        amount: f64,
        payment_proof_url: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: EventKind::PaymentUploaded,
            data: json!({
                "registration_id": registration_id,
                "amount": amount,
                "payment_proof_url": payment_proof_url,
                "timestamp": rfc3339(at),
            }),
        }
    }

    /// `payment.verified`.
    #[must_use]
    pub fn payment_verified(registration_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            event: EventKind::PaymentVerified,
            data: json!({
                "registration_id": registration_id,
                "verification_status": "approved",
                "timestamp": rfc3339(at),
            }),
        }
    }

    /// `registration.confirmed`.
    #[must_use]
    pub fn registration_confirmed(registration_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            event: EventKind::RegistrationConfirmed,
            data: json!({
                "registration_id": registration_id,
                "timestamp": rfc3339(at),
            }),
        }
    }

    /// The event that announces a registration reaching `status`, if any.
    #[must_use]
    pub fn for_status(registration_id: Uuid, status: RegistrationStatus, at: DateTime<Utc>) -> Option<Self> {
        match status {
            RegistrationStatus::Pending => None,
            RegistrationStatus::Confirmed => Some(Self::registration_confirmed(registration_id, at)),
            RegistrationStatus::Cancelled => {
                Some(Self::registration_cancelled(registration_id, None, at))
            },
        }
    }

    /// The registration id carried in `data`, used as the partition key.
    #[must_use]
    pub fn registration_id(&self) -> Option<&str> {
        self.data.get("registration_id").and_then(Value::as_str)
    }

    /// Encode as JSON bytes for the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] for malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Inbound `event.status.changed` record.
///
/// `registration_id` and `status` stay strings on the wire so that a bad id or
/// an unknown status is reported per message rather than as a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    /// Target registration.
    pub registration_id: String,
    /// Requested status name.
    pub status: String,
    /// RFC-3339 time of the upstream change.
    pub timestamp: String,
}

impl StatusChanged {
    /// Build a record stamped with `at`.
    #[must_use]
    pub fn new(registration_id: impl Into<String>, status: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            registration_id: registration_id.into(),
            status: status.into(),
            timestamp: rfc3339(at),
        }
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] for malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }

    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::NewRegistration;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T12:30:45.123Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert!(matches!(EventKind::parse(kind.as_str()), Ok(k) if k == kind));
            let json = serde_json::to_string(&kind).unwrap_or_default();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!(EventKind::parse("order.placed").is_err());
    }

    #[test]
    fn timestamps_are_utc_seconds() {
        assert_eq!(rfc3339(fixed_time()), "2025-01-01T12:30:45Z");
    }

    #[test]
    fn created_event_carries_registration_fields() {
        let reg = NewRegistration {
            event_id: Uuid::new_v4(),
            full_name: "A".to_string(),
            gender: "F".to_string(),
            phone: "123".to_string(),
            email: "a@b.com".to_string(),
            ..NewRegistration::default()
        }
        .into_registration(Uuid::new_v4(), fixed_time());

        let event = DomainEvent::registration_created(&reg, fixed_time());
        let envelope = serde_json::to_value(&event).unwrap_or_default();

        assert_eq!(envelope["event"], "registration.created");
        assert_eq!(envelope["data"]["registration_id"], reg.registration_id.to_string());
        assert_eq!(envelope["data"]["event_id"], reg.event_id.to_string());
        assert_eq!(envelope["data"]["status"], "pending");
        assert_eq!(envelope["data"]["user_id"], Value::Null);
        assert_eq!(envelope["data"]["timestamp"], "2025-01-01T12:30:45Z");
    }

    #[test]
    fn verified_event_is_approved() {
        let id = Uuid::new_v4();
        let event = DomainEvent::payment_verified(id, fixed_time());
        assert_eq!(event.data["verification_status"], "approved");
        assert_eq!(event.registration_id(), Some(id.to_string().as_str()));
    }

    #[test]
    fn pending_has_no_announcement() {
        let id = Uuid::new_v4();
        assert!(DomainEvent::for_status(id, RegistrationStatus::Pending, fixed_time()).is_none());
        let cancelled = DomainEvent::for_status(id, RegistrationStatus::Cancelled, fixed_time());
        assert_eq!(cancelled.map(|e| e.event), Some(EventKind::RegistrationCancelled));
    }

    #[test]
    fn status_changed_decodes_wire_shape() {
        let raw = br#"{"registration_id":"REG-001-1","status":"confirmed","timestamp":"2025-01-01T00:00:00Z"}"#;
        let decoded = StatusChanged::from_bytes(raw);
        assert!(matches!(decoded, Ok(ref s) if s.registration_id == "REG-001-1" && s.status == "confirmed"));
    }

    #[test]
    fn status_changed_rejects_non_json() {
        assert!(StatusChanged::from_bytes(b"not json").is_err());
        assert!(StatusChanged::from_bytes(br#"{"status":"confirmed"}"#).is_err());
    }

    #[test]
    fn domain_event_bytes_round_trip() {
        let id = Uuid::new_v4();
        let event = DomainEvent::registration_cancelled(id, Some("duplicate"), fixed_time());
        let decoded = event.to_bytes().and_then(|b| DomainEvent::from_bytes(&b));
        assert!(matches!(decoded, Ok(ref e) if *e == event));
    }
}
