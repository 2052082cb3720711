//! Dependent-resource deletion coordinator.
//!
//! The schema declares no cascades, so removing a course event means
//! deleting every row that references it, children before parent, inside
//! one transaction. The order comes from `COURSE_EVENT_DEPENDENTS`; a
//! new dependent table is added to that list, not to this module.

use coursedesk_core::classify::{WriteIntent, classify};
use coursedesk_core::command::Command;
use coursedesk_core::entity::EntityKind;
use coursedesk_core::error::RegistrationError;
use coursedesk_core::retry::{RetryPolicy, run_with_retries};
use coursedesk_core::store::{COURSE_EVENT_DEPENDENTS, DependentTable, Store};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::domain::commands::RemoveCourseEvent;

/// Per-table counts of the rows a removal deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalReport {
    /// Registrations removed.
    pub registrations: u64,
    /// Instructor assignment rows removed.
    pub instructor_assignments: u64,
    /// Location assignment rows removed.
    pub location_assignments: u64,
}

impl RemovalReport {
    fn record(&mut self, table: DependentTable, removed: u64) {
        match table {
            DependentTable::Registrations => self.registrations = removed,
            DependentTable::InstructorAssignments => self.instructor_assignments = removed,
            DependentTable::LocationAssignments => self.location_assignments = removed,
        }
    }
}

/// Removes a course event together with everything that references it.
///
/// Either the event and all of its dependents are gone, or, on any
/// failure at any step, all of them remain; partial deletion is never
/// observable.
///
/// # Errors
///
/// - [`RegistrationError::NotFound`]: the course event does not exist
///   (no transaction side effects).
/// - [`RegistrationError::Cancelled`] / [`RegistrationError::Fatal`]:
///   cancellation or unclassified store failure; the transaction rolled
///   back in full.
#[instrument(
    skip(command, store, cancel),
    fields(
        command = command.command_type(),
        correlation_id = %command.correlation_id(),
        course_event_id = %command.course_event_id,
    )
)]
pub async fn remove_course_event(
    command: &RemoveCourseEvent,
    store: &dyn Store,
    cancel: &CancellationToken,
) -> Result<RemovalReport, RegistrationError> {
    run_with_retries(RetryPolicy::default(), cancel, || {
        remove_course_event_once(command, store)
    })
    .await
}

async fn remove_course_event_once(
    command: &RemoveCourseEvent,
    store: &dyn Store,
) -> Result<RemovalReport, RegistrationError> {
    let intent = WriteIntent::Remove {
        course_event_id: command.course_event_id,
    };

    let mut session = store.begin().await.map_err(|e| classify(e, intent))?;

    if session
        .course_event(command.course_event_id)
        .await
        .map_err(|e| classify(e, intent))?
        .is_none()
    {
        session.rollback().await.map_err(|e| classify(e, intent))?;
        return Err(RegistrationError::NotFound {
            entity: EntityKind::CourseEvent,
            id: command.course_event_id,
        });
    }

    let mut report = RemovalReport::default();
    for table in COURSE_EVENT_DEPENDENTS {
        let removed = session
            .delete_dependents(table, command.course_event_id)
            .await
            .map_err(|e| classify(e, intent))?;
        report.record(table, removed);
    }

    if !session
        .delete_course_event(command.course_event_id)
        .await
        .map_err(|e| classify(e, intent))?
    {
        // The existence check ran in this same transaction; a vanished row
        // here means a concurrent deletion won.
        session.rollback().await.map_err(|e| classify(e, intent))?;
        return Err(RegistrationError::NotFound {
            entity: EntityKind::CourseEvent,
            id: command.course_event_id,
        });
    }

    session.commit().await.map_err(|e| classify(e, intent))?;

    info!(
        registrations = report.registrations,
        instructor_assignments = report.instructor_assignments,
        location_assignments = report.location_assignments,
        "course event removed with dependents"
    );
    Ok(report)
}
