//! Store abstraction consumed by the registration operations.

use async_trait::async_trait;
use uuid::Uuid;

use crate::entity::{
    CourseEvent, CourseEventChanges, NewRegistration, Registration, RegistrationChanges,
};
use crate::error::StoreError;
use crate::version::VersionToken;

/// Tables holding rows that reference `course_events`.
///
/// [`COURSE_EVENT_DEPENDENTS`] fixes the deletion order; the variants exist
/// so that order lives in one place instead of inside a deletion routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentTable {
    /// Participant registrations for the event.
    Registrations,
    /// Instructor-to-event assignments.
    InstructorAssignments,
    /// Venue-location-to-event assignments.
    LocationAssignments,
}

/// Deletion order for everything referencing a course event: children
/// before parent. A new dependent table is added here, nowhere else.
pub const COURSE_EVENT_DEPENDENTS: [DependentTable; 3] = [
    DependentTable::Registrations,
    DependentTable::InstructorAssignments,
    DependentTable::LocationAssignments,
];

/// Handle to a transactional store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transactional session.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when a transaction cannot be started.
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// One open transaction against the store.
///
/// Reads observe the transaction's isolation level; writes stay invisible
/// to other sessions until [`commit`](Self::commit). Dropping a session
/// without committing discards all of its writes; operations lean on this
/// when they are cancelled mid-flight.
#[async_trait]
pub trait StoreSession: Send {
    /// Fetches a course event by id.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the read fails.
    async fn course_event(&mut self, id: Uuid) -> Result<Option<CourseEvent>, StoreError>;

    /// Fetches a registration by id.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the read fails.
    async fn registration(&mut self, id: Uuid) -> Result<Option<Registration>, StoreError>;

    /// Counts seat-holding registrations for a course event.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the count fails.
    async fn count_seated(&mut self, course_event_id: Uuid) -> Result<i64, StoreError>;

    /// Whether a seat-holding registration already exists for the pair.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the read fails.
    async fn active_pair_exists(
        &mut self,
        participant_id: Uuid,
        course_event_id: Uuid,
    ) -> Result<bool, StoreError>;

    /// Inserts a candidate registration; the store assigns its version.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UniqueViolation` when the participant already
    /// holds a seat for the event, `StoreError::ForeignKeyViolation` when
    /// the course event row is absent.
    async fn insert_registration(
        &mut self,
        candidate: &NewRegistration,
    ) -> Result<Registration, StoreError>;

    /// Conditionally rewrites a course event: applied only when the stored
    /// version equals `expected`, in which case the store replaces the
    /// token atomically. `None` means zero rows were affected.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the write fails for store reasons; a
    /// failed version predicate is `Ok(None)`, not an error.
    async fn update_course_event(
        &mut self,
        id: Uuid,
        expected: VersionToken,
        changes: &CourseEventChanges,
    ) -> Result<Option<CourseEvent>, StoreError>;

    /// Conditionally rewrites a registration; same contract as
    /// [`update_course_event`](Self::update_course_event).
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the write fails for store reasons.
    async fn update_registration(
        &mut self,
        id: Uuid,
        expected: VersionToken,
        changes: &RegistrationChanges,
    ) -> Result<Option<Registration>, StoreError>;

    /// Deletes the rows of `table` that reference the course event,
    /// returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the delete fails.
    async fn delete_dependents(
        &mut self,
        table: DependentTable,
        course_event_id: Uuid,
    ) -> Result<u64, StoreError>;

    /// Deletes the course event row itself. `false` when absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ForeignKeyViolation` while dependent rows still
    /// reference the event.
    async fn delete_course_event(&mut self, id: Uuid) -> Result<bool, StoreError>;

    /// Commits the transaction, publishing all writes atomically.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` when the store refuses the
    /// commit against a concurrent transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Rolls the transaction back explicitly.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the rollback itself fails.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
