//! The registration entity and its lifecycle.
//!
//! A [`Registration`] is created `pending` and moves forward exactly once, to
//! either `confirmed` or `cancelled`:
//!
//! ```text
//!            ┌──────────► confirmed
//!  pending ──┤
//!            └──────────► cancelled
//! ```
//!
//! Every status change in the system (HTTP cancel, payment verification, the
//! `event.status.changed` subscriber) goes through
//! [`RegistrationStatus::transition`], so an out-of-order or replayed message can
//! never move a registration backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle status of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Created, awaiting payment verification.
    Pending,
    /// Payment verified. Terminal.
    Confirmed,
    /// Cancelled by the registrant or upstream. Terminal.
    Cancelled,
}

/// Returned when a string is not one of the known status names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid registration status: {0}")]
pub struct InvalidStatus(pub String);

/// A status change that is not allowed by the lifecycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    /// Current status.
    pub from: RegistrationStatus,
    /// Requested status.
    pub to: RegistrationStatus,
}

/// Outcome of a permitted status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status moves to the contained value.
    Applied(RegistrationStatus),
    /// The requested status equals the current one; nothing to write.
    Unchanged,
}

impl RegistrationStatus {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from its database / wire string.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStatus`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, InvalidStatus> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(InvalidStatus(s.to_string())),
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled)
    }

    /// Decide whether `self` may move to `proposed`.
    ///
    /// Re-applying the current status is accepted as [`Transition::Unchanged`]
    /// so that redelivered messages are harmless.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for anything other than
    /// `pending → confirmed`, `pending → cancelled`, or a no-op.
    pub const fn transition(self, proposed: Self) -> Result<Transition, InvalidTransition> {
        match (self, proposed) {
            (Self::Pending, Self::Pending)
            | (Self::Confirmed, Self::Confirmed)
            | (Self::Cancelled, Self::Cancelled) => Ok(Transition::Unchanged),
            (Self::Pending, Self::Confirmed | Self::Cancelled) => Ok(Transition::Applied(proposed)),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A persisted registration for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Generated identifier, immutable after creation.
    pub registration_id: Uuid,
    /// The event being registered for.
    pub event_id: Uuid,
    /// Owning user account, if the registrant is signed in.
    pub user_id: Option<Uuid>,
    /// Registrant's full name.
    pub full_name: String,
    /// Registrant's gender.
    pub gender: String,
    /// Contact phone number.
    pub phone: String,
    /// Contact email.
    pub email: String,
    /// Postal address.
    pub address: Option<String>,
    /// Emergency contact name.
    pub emergency_contact_name: Option<String>,
    /// Emergency contact phone.
    pub emergency_contact_phone: Option<String>,
    /// Relationship of the emergency contact to the registrant.
    pub emergency_contact_relation: Option<String>,
    /// Accessibility or dietary notes.
    pub special_needs: Option<String>,
    /// When the registration was submitted.
    pub registration_date: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: RegistrationStatus,
    /// Set once, when the status becomes `cancelled`.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set once, when cancelled through the API.
    pub cancellation_reason: Option<String>,
    /// Free-text staff notes.
    pub notes: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time; strictly increases with every write.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRegistration {
    /// The event being registered for.
    pub event_id: Uuid,
    /// Owning user account.
    pub user_id: Option<Uuid>,
    /// Registrant's full name.
    pub full_name: String,
    /// Registrant's gender.
    pub gender: String,
    /// Contact phone number.
    pub phone: String,
    /// Contact email.
    pub email: String,
    /// Postal address.
    pub address: Option<String>,
    /// Emergency contact name.
    pub emergency_contact_name: Option<String>,
    /// Emergency contact phone.
    pub emergency_contact_phone: Option<String>,
    /// Emergency contact relation.
    pub emergency_contact_relation: Option<String>,
    /// Accessibility or dietary notes.
    pub special_needs: Option<String>,
}

impl NewRegistration {
    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message naming the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_id.is_nil() {
            return Err("event_id is required".to_string());
        }

        let required = [
            ("full_name", &self.full_name),
            ("gender", &self.gender),
            ("phone", &self.phone),
            ("email", &self.email),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(format!("{name} is required"));
        }

        if !self.email.contains('@') {
            return Err("email is not a valid address".to_string());
        }

        Ok(())
    }

    /// Build the row a store inserts for this input.
    #[must_use]
    pub fn into_registration(self, registration_id: Uuid, now: DateTime<Utc>) -> Registration {
        Registration {
            registration_id,
            event_id: self.event_id,
            user_id: self.user_id,
            full_name: self.full_name,
            gender: self.gender,
            phone: self.phone,
            email: self.email,
            address: self.address,
            emergency_contact_name: self.emergency_contact_name,
            emergency_contact_phone: self.emergency_contact_phone,
            emergency_contact_relation: self.emergency_contact_relation,
            special_needs: self.special_needs,
            registration_date: now,
            status: RegistrationStatus::Pending,
            cancelled_at: None,
            cancellation_reason: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` leaves the stored value as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationPatch {
    /// New full name.
    pub full_name: Option<String>,
    /// New phone.
    pub phone: Option<String>,
    /// New email.
    pub email: Option<String>,
    /// New address.
    pub address: Option<String>,
    /// New emergency contact name.
    pub emergency_contact_name: Option<String>,
    /// New emergency contact phone.
    pub emergency_contact_phone: Option<String>,
    /// New emergency contact relation.
    pub emergency_contact_relation: Option<String>,
    /// New special needs note.
    pub special_needs: Option<String>,
    /// New staff notes.
    pub notes: Option<String>,
}

impl RegistrationPatch {
    /// True when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.address.is_none()
            && self.emergency_contact_name.is_none()
            && self.emergency_contact_phone.is_none()
            && self.emergency_contact_relation.is_none()
            && self.special_needs.is_none()
            && self.notes.is_none()
    }

    /// Reject present-but-blank required fields and malformed emails.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("full_name", &self.full_name),
            ("phone", &self.phone),
            ("email", &self.email),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(format!("{name} must not be blank"));
            }
        }
        if self.email.as_deref().is_some_and(|e| !e.contains('@')) {
            return Err("email is not a valid address".to_string());
        }
        Ok(())
    }

    /// Coalesce this patch onto `registration`.
    pub fn apply_to(&self, registration: &mut Registration) {
        fn set(target: &mut String, value: Option<&String>) {
            if let Some(v) = value {
                target.clone_from(v);
            }
        }
        fn set_opt(target: &mut Option<String>, value: Option<&String>) {
            if let Some(v) = value {
                *target = Some(v.clone());
            }
        }

        set(&mut registration.full_name, self.full_name.as_ref());
        set(&mut registration.phone, self.phone.as_ref());
        set(&mut registration.email, self.email.as_ref());
        set_opt(&mut registration.address, self.address.as_ref());
        set_opt(&mut registration.emergency_contact_name, self.emergency_contact_name.as_ref());
        set_opt(&mut registration.emergency_contact_phone, self.emergency_contact_phone.as_ref());
        set_opt(
            &mut registration.emergency_contact_relation,
            self.emergency_contact_relation.as_ref(),
        );
        set_opt(&mut registration.special_needs, self.special_needs.as_ref());
        set_opt(&mut registration.notes, self.notes.as_ref());
    }
}

/// Page and filter for listing registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    /// Page size, `1..=MAX_LIMIT`.
    pub limit: u32,
    /// Rows to skip.
    pub offset: u32,
    /// Only registrations for this event.
    pub event_id: Option<Uuid>,
    /// Only registrations owned by this user.
    pub user_id: Option<Uuid>,
}

impl ListQuery {
    /// Page size used when the caller gives none.
    pub const DEFAULT_LIMIT: u32 = 20;
    /// Largest accepted page size.
    pub const MAX_LIMIT: u32 = 100;

    /// Build a query, clamping `limit` into range.
    #[must_use]
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
            event_id: None,
            user_id: None,
        }
    }

    /// Restrict to one event.
    #[must_use]
    pub const fn for_event(mut self, event_id: Option<Uuid>) -> Self {
        self.event_id = event_id;
        self
    }

    /// Restrict to one user.
    #[must_use]
    pub const fn for_user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Whether `registration` passes the filters.
    #[must_use]
    pub fn matches(&self, registration: &Registration) -> bool {
        self.event_id.is_none_or(|id| registration.event_id == id)
            && self.user_id.is_none_or(|id| registration.user_id == Some(id))
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Next `updated_at` value: the clock, but never at or before the previous one.
#[must_use]
pub fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + chrono::Duration::microseconds(1);
    if now > floor { now } else { floor }
}
