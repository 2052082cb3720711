//! Persisted domain entities shared between the operations and the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::version::VersionToken;

/// A scheduled course occurrence with a finite number of seats.
///
/// `seats` is always positive; occupancy is derived by counting
/// seat-holding registrations, never stored as a counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseEvent {
    /// Row identity.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// Scheduled start.
    pub starts_at: DateTime<Utc>,
    /// Price in minor currency units.
    pub price_cents: i64,
    /// Seat capacity.
    pub seats: u32,
    /// Concurrency token, store-assigned.
    pub version: VersionToken,
}

/// Lifecycle status of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Admitted, payment outstanding.
    Pending,
    /// Admitted and paid.
    Paid,
    /// Withdrawn by the participant or an operator.
    Cancelled,
    /// Paid, then reimbursed.
    Refunded,
}

impl RegistrationStatus {
    /// Whether a registration in this status occupies a seat.
    ///
    /// Cancelled and refunded registrations release their seat; occupancy
    /// and the one-registration-per-participant rule both use this
    /// predicate.
    #[must_use]
    pub const fn holds_seat(self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }

    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// A participant's registration for a course event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Row identity.
    pub id: Uuid,
    /// The registered participant.
    pub participant_id: Uuid,
    /// The course event the seat belongs to.
    pub course_event_id: Uuid,
    /// Lifecycle status.
    pub status: RegistrationStatus,
    /// Payment method on file, if any.
    pub payment_method_id: Option<Uuid>,
    /// When admission control created the row.
    pub created_at: DateTime<Utc>,
    /// Concurrency token, store-assigned.
    pub version: VersionToken,
}

/// A candidate registration presented to admission control.
///
/// The application assigns `id` and `created_at`; the store assigns the
/// version token on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegistration {
    /// Identity of the row to create.
    pub id: Uuid,
    /// The participant requesting a seat.
    pub participant_id: Uuid,
    /// The target course event.
    pub course_event_id: Uuid,
    /// Initial lifecycle status.
    pub status: RegistrationStatus,
    /// Payment method on file, if any.
    pub payment_method_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Replacement values for a course event revision.
///
/// The caller re-reads the row, constructs the full set of new values, and
/// presents them together with the version it observed.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseEventChanges {
    /// New display title.
    pub title: String,
    /// New scheduled start.
    pub starts_at: DateTime<Utc>,
    /// New price in minor currency units.
    pub price_cents: i64,
    /// New seat capacity.
    pub seats: u32,
}

/// Replacement values for a registration revision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationChanges {
    /// New lifecycle status.
    pub status: RegistrationStatus,
    /// New payment method, if any.
    pub payment_method_id: Option<Uuid>,
}

/// The mutable entity kinds the error taxonomy can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A course event row.
    CourseEvent,
    /// A registration row.
    Registration,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CourseEvent => write!(f, "course event"),
            Self::Registration => write!(f, "registration"),
        }
    }
}
