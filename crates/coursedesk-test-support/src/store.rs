//! In-memory store — a serialized transactional `Store` for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coursedesk_core::entity::{
    CourseEvent, CourseEventChanges, NewRegistration, Registration, RegistrationChanges,
};
use coursedesk_core::error::StoreError;
use coursedesk_core::store::{DependentTable, Store, StoreSession};
use coursedesk_core::version::VersionToken;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Snapshot of everything the in-memory store holds.
#[derive(Debug, Clone, Default)]
pub struct Contents {
    /// Course events by id.
    pub course_events: HashMap<Uuid, CourseEvent>,
    /// Registrations by id.
    pub registrations: HashMap<Uuid, Registration>,
    /// `(course_event_id, instructor_id)` assignment rows.
    pub instructor_assignments: Vec<(Uuid, Uuid)>,
    /// `(course_event_id, location_id)` assignment rows.
    pub location_assignments: Vec<(Uuid, Uuid)>,
}

impl Contents {
    fn holds_active_pair(&self, participant_id: Uuid, course_event_id: Uuid) -> bool {
        self.registrations.values().any(|registration| {
            registration.participant_id == participant_id
                && registration.course_event_id == course_event_id
                && registration.status.holds_seat()
        })
    }

    fn references_course_event(&self, course_event_id: Uuid) -> bool {
        self.registrations
            .values()
            .any(|registration| registration.course_event_id == course_event_id)
            || self
                .instructor_assignments
                .iter()
                .any(|(event, _)| *event == course_event_id)
            || self
                .location_assignments
                .iter()
                .any(|(event, _)| *event == course_event_id)
    }
}

/// Session operations a scripted fault can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Starting a transaction.
    Begin,
    /// Counting seat-holding registrations.
    CountSeated,
    /// Inserting a candidate registration.
    InsertRegistration,
    /// Conditionally updating a course event.
    UpdateCourseEvent,
    /// Conditionally updating a registration.
    UpdateRegistration,
    /// Deleting the dependent rows of one table.
    DeleteDependents(DependentTable),
    /// Deleting the course event row.
    DeleteCourseEvent,
    /// Committing the transaction.
    Commit,
}

type FaultQueue = Arc<Mutex<VecDeque<(FaultPoint, StoreError)>>>;

/// A transactional in-memory store.
///
/// Transactions are fully serialized: `begin` hands out the single state
/// lock, so every session observes a settled state and publishes
/// atomically, which is the guarantee the production store provides through
/// SERIALIZABLE transactions. Writes go to a working copy and reach the
/// shared state only on commit; a dropped session discards them.
///
/// Faults queued with [`fail_once`](Self::fail_once) are consumed by the
/// next matching operation, which is how tests script transient contention
/// and mid-transaction failures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<AsyncMutex<Contents>>,
    faults: FaultQueue,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a fault that the next matching operation reports instead of
    /// executing.
    ///
    /// # Panics
    ///
    /// Panics if the internal fault mutex is poisoned.
    pub fn fail_once(&self, point: FaultPoint, error: StoreError) {
        self.faults.lock().unwrap().push_back((point, error));
    }

    /// Inserts a course event directly, bypassing any session.
    pub async fn seed_course_event(&self, event: CourseEvent) {
        self.state.lock().await.course_events.insert(event.id, event);
    }

    /// Inserts a registration directly, bypassing any session.
    pub async fn seed_registration(&self, registration: Registration) {
        self.state
            .lock()
            .await
            .registrations
            .insert(registration.id, registration);
    }

    /// Inserts an instructor assignment row directly.
    pub async fn seed_instructor_assignment(&self, course_event_id: Uuid, instructor_id: Uuid) {
        self.state
            .lock()
            .await
            .instructor_assignments
            .push((course_event_id, instructor_id));
    }

    /// Inserts a location assignment row directly.
    pub async fn seed_location_assignment(&self, course_event_id: Uuid, location_id: Uuid) {
        self.state
            .lock()
            .await
            .location_assignments
            .push((course_event_id, location_id));
    }

    /// Returns a snapshot of the committed state.
    pub async fn contents(&self) -> Contents {
        self.state.lock().await.clone()
    }

    fn take_fault(faults: &FaultQueue, point: FaultPoint) -> Option<StoreError> {
        let mut queue = faults.lock().unwrap();
        let position = queue.iter().position(|(at, _)| *at == point)?;
        queue.remove(position).map(|(_, error)| error)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        if let Some(error) = Self::take_fault(&self.faults, FaultPoint::Begin) {
            return Err(error);
        }
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemorySession {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct InMemorySession {
    guard: OwnedMutexGuard<Contents>,
    working: Contents,
    faults: FaultQueue,
}

impl InMemorySession {
    fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        match InMemoryStore::take_fault(&self.faults, point) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreSession for InMemorySession {
    async fn course_event(&mut self, id: Uuid) -> Result<Option<CourseEvent>, StoreError> {
        Ok(self.working.course_events.get(&id).cloned())
    }

    async fn registration(&mut self, id: Uuid) -> Result<Option<Registration>, StoreError> {
        Ok(self.working.registrations.get(&id).cloned())
    }

    async fn count_seated(&mut self, course_event_id: Uuid) -> Result<i64, StoreError> {
        self.check(FaultPoint::CountSeated)?;
        let count = self
            .working
            .registrations
            .values()
            .filter(|registration| {
                registration.course_event_id == course_event_id
                    && registration.status.holds_seat()
            })
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn active_pair_exists(
        &mut self,
        participant_id: Uuid,
        course_event_id: Uuid,
    ) -> Result<bool, StoreError> {
        Ok(self.working.holds_active_pair(participant_id, course_event_id))
    }

    async fn insert_registration(
        &mut self,
        candidate: &NewRegistration,
    ) -> Result<Registration, StoreError> {
        self.check(FaultPoint::InsertRegistration)?;
        if !self
            .working
            .course_events
            .contains_key(&candidate.course_event_id)
        {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "registrations_course_event_id_fkey".into(),
            });
        }
        if candidate.status.holds_seat()
            && self
                .working
                .holds_active_pair(candidate.participant_id, candidate.course_event_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: "registrations_active_participant_event_idx".into(),
            });
        }
        if self.working.registrations.contains_key(&candidate.id) {
            return Err(StoreError::UniqueViolation {
                constraint: "registrations_pkey".into(),
            });
        }

        let registration = Registration {
            id: candidate.id,
            participant_id: candidate.participant_id,
            course_event_id: candidate.course_event_id,
            status: candidate.status,
            payment_method_id: candidate.payment_method_id,
            created_at: candidate.created_at,
            version: VersionToken::initial(),
        };
        self.working
            .registrations
            .insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn update_course_event(
        &mut self,
        id: Uuid,
        expected: VersionToken,
        changes: &CourseEventChanges,
    ) -> Result<Option<CourseEvent>, StoreError> {
        self.check(FaultPoint::UpdateCourseEvent)?;
        let Some(event) = self.working.course_events.get_mut(&id) else {
            return Ok(None);
        };
        if event.version != expected {
            return Ok(None);
        }
        event.title = changes.title.clone();
        event.starts_at = changes.starts_at;
        event.price_cents = changes.price_cents;
        event.seats = changes.seats;
        event.version = event.version.next();
        Ok(Some(event.clone()))
    }

    async fn update_registration(
        &mut self,
        id: Uuid,
        expected: VersionToken,
        changes: &RegistrationChanges,
    ) -> Result<Option<Registration>, StoreError> {
        self.check(FaultPoint::UpdateRegistration)?;
        let Some(current) = self.working.registrations.get(&id).cloned() else {
            return Ok(None);
        };
        if current.version != expected {
            return Ok(None);
        }
        // A write that re-enters the partial unique index is checked the
        // same way the production schema checks it.
        if changes.status.holds_seat()
            && !current.status.holds_seat()
            && self.working.registrations.values().any(|other| {
                other.id != id
                    && other.participant_id == current.participant_id
                    && other.course_event_id == current.course_event_id
                    && other.status.holds_seat()
            })
        {
            return Err(StoreError::UniqueViolation {
                constraint: "registrations_active_participant_event_idx".into(),
            });
        }

        let mut updated = current;
        updated.status = changes.status;
        updated.payment_method_id = changes.payment_method_id;
        updated.version = updated.version.next();
        self.working.registrations.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_dependents(
        &mut self,
        table: DependentTable,
        course_event_id: Uuid,
    ) -> Result<u64, StoreError> {
        self.check(FaultPoint::DeleteDependents(table))?;
        let removed = match table {
            DependentTable::Registrations => {
                let before = self.working.registrations.len();
                self.working
                    .registrations
                    .retain(|_, registration| registration.course_event_id != course_event_id);
                before - self.working.registrations.len()
            }
            DependentTable::InstructorAssignments => {
                let before = self.working.instructor_assignments.len();
                self.working
                    .instructor_assignments
                    .retain(|(event, _)| *event != course_event_id);
                before - self.working.instructor_assignments.len()
            }
            DependentTable::LocationAssignments => {
                let before = self.working.location_assignments.len();
                self.working
                    .location_assignments
                    .retain(|(event, _)| *event != course_event_id);
                before - self.working.location_assignments.len()
            }
        };
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn delete_course_event(&mut self, id: Uuid) -> Result<bool, StoreError> {
        self.check(FaultPoint::DeleteCourseEvent)?;
        if self.working.references_course_event(id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "course_event_dependents_fkey".into(),
            });
        }
        Ok(self.working.course_events.remove(&id).is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.check(FaultPoint::Commit)?;
        let session = *self;
        let mut guard = session.guard;
        *guard = session.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Dropping the guard releases the lock; the working copy is
        // discarded with it.
        Ok(())
    }
}
