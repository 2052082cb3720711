//! Error taxonomy for the registration core.

use thiserror::Error;
use uuid::Uuid;

use crate::entity::EntityKind;

/// Caller-facing outcome taxonomy for registration operations.
///
/// `CapacityExhausted`, `DuplicateRegistration`, `VersionConflict`, and
/// `NotFound` are expected decisions, not infrastructure failures; callers
/// branch on the variant, never on message text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// Every seat of the target course event is taken.
    #[error("course event {course_event_id} is full ({seats} seats)")]
    CapacityExhausted {
        /// The full course event.
        course_event_id: Uuid,
        /// Its seat capacity.
        seats: u32,
    },

    /// The participant already holds a seat for this course event.
    #[error(
        "participant {participant_id} is already registered for course event {course_event_id}"
    )]
    DuplicateRegistration {
        /// The participant attempting to register twice.
        participant_id: Uuid,
        /// The course event in question.
        course_event_id: Uuid,
    },

    /// The row changed between the caller's read and write.
    ///
    /// Recoverable by re-reading; never retried automatically, because the
    /// new state may invalidate the caller's intent.
    #[error("version conflict on {entity} {id}")]
    VersionConflict {
        /// Which entity kind was written.
        entity: EntityKind,
        /// The contested row.
        id: Uuid,
    },

    /// The target or referenced entity does not exist (or was deleted).
    #[error("{entity} {id} not found")]
    NotFound {
        /// Which entity kind was missing.
        entity: EntityKind,
        /// The absent row.
        id: Uuid,
    },

    /// A domain rule rejected the input before it reached the store.
    #[error("validation error: {0}")]
    Validation(String),

    /// Transient store contention; the whole operation is safe to re-run.
    #[error("transient store contention: {0}")]
    Retryable(String),

    /// The operation was cancelled; the open transaction rolled back.
    #[error("operation cancelled")]
    Cancelled,

    /// Unclassified store failure. Surfaced, never silently retried.
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl RegistrationError {
    /// Whether the bounded internal retry may re-run the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Raw failure signal surfaced by a store implementation.
///
/// Sessions report what happened in store terms;
/// [`classify`](crate::classify::classify) maps these onto
/// [`RegistrationError`] so callers branch on meaning instead of on
/// store-specific codes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A unique constraint rejected a write.
    #[error("unique constraint {constraint} violated")]
    UniqueViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// A foreign key constraint rejected a write.
    #[error("foreign key constraint {constraint} violated")]
    ForeignKeyViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// The store refused to commit against a concurrent transaction.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Anything the store reported that fits no other variant.
    #[error("store error: {0}")]
    Other(String),
}
