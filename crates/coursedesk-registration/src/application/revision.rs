//! Concurrency-token guarded revisions.
//!
//! Every mutable entity is written the same way: a conditional update
//! keyed on the version token the caller last observed. Zero affected
//! rows resolve, inside the same transaction, into either a version
//! conflict or a missing row; the two are never conflated, and a version
//! conflict is never retried here (the caller must re-read first).

use coursedesk_core::classify::{WriteIntent, classify};
use coursedesk_core::command::Command;
use coursedesk_core::entity::{
    CourseEvent, EntityKind, Registration, RegistrationChanges, RegistrationStatus,
};
use coursedesk_core::error::RegistrationError;
use coursedesk_core::retry::{RetryPolicy, run_with_retries};
use coursedesk_core::store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::domain::commands::{CancelRegistration, ReviseCourseEvent, ReviseRegistration};

/// Rewrites a course event's mutable attributes behind the version guard.
///
/// The occupancy count and the conditional write share one transaction, so
/// capacity can never shrink below the seats already taken.
///
/// # Errors
///
/// - [`RegistrationError::Validation`]: zero seats, or fewer seats than
///   current occupancy.
/// - [`RegistrationError::VersionConflict`]: the row changed since the
///   caller's read.
/// - [`RegistrationError::NotFound`]: the course event does not exist.
/// - [`RegistrationError::Cancelled`] / [`RegistrationError::Fatal`]:
///   cancellation or unclassified store failure.
#[instrument(
    skip(command, store, cancel),
    fields(
        command = command.command_type(),
        correlation_id = %command.correlation_id(),
        course_event_id = %command.course_event_id,
    )
)]
pub async fn revise_course_event(
    command: &ReviseCourseEvent,
    store: &dyn Store,
    cancel: &CancellationToken,
) -> Result<CourseEvent, RegistrationError> {
    if command.changes.seats == 0 {
        return Err(RegistrationError::Validation(
            "a course event needs at least one seat".into(),
        ));
    }
    run_with_retries(RetryPolicy::default(), cancel, || {
        revise_course_event_once(command, store)
    })
    .await
}

async fn revise_course_event_once(
    command: &ReviseCourseEvent,
    store: &dyn Store,
) -> Result<CourseEvent, RegistrationError> {
    let intent = WriteIntent::Revise {
        entity: EntityKind::CourseEvent,
        id: command.course_event_id,
    };

    let mut session = store.begin().await.map_err(|e| classify(e, intent))?;

    let seated = session
        .count_seated(command.course_event_id)
        .await
        .map_err(|e| classify(e, intent))?;
    if i64::from(command.changes.seats) < seated {
        session.rollback().await.map_err(|e| classify(e, intent))?;
        return Err(RegistrationError::Validation(format!(
            "cannot shrink capacity to {} seats below current occupancy of {seated}",
            command.changes.seats
        )));
    }

    let updated = session
        .update_course_event(
            command.course_event_id,
            command.expected_version,
            &command.changes,
        )
        .await
        .map_err(|e| classify(e, intent))?;

    match updated {
        Some(event) => {
            session.commit().await.map_err(|e| classify(e, intent))?;
            info!(version = %event.version, "course event revised");
            Ok(event)
        }
        None => {
            let exists = session
                .course_event(command.course_event_id)
                .await
                .map_err(|e| classify(e, intent))?
                .is_some();
            session.rollback().await.map_err(|e| classify(e, intent))?;
            Err(if exists {
                RegistrationError::VersionConflict {
                    entity: EntityKind::CourseEvent,
                    id: command.course_event_id,
                }
            } else {
                RegistrationError::NotFound {
                    entity: EntityKind::CourseEvent,
                    id: command.course_event_id,
                }
            })
        }
    }
}

/// Rewrites a registration's status and payment method behind the version
/// guard.
///
/// A revision that flips the registration from a released status back to a
/// seat-holding one claims a seat again, so it re-runs the admission
/// checks (pair uniqueness, capacity) in the same transaction.
///
/// # Errors
///
/// - [`RegistrationError::VersionConflict`]: the row changed since the
///   caller's read.
/// - [`RegistrationError::NotFound`]: the registration (or, while
///   re-seating, its course event) does not exist.
/// - [`RegistrationError::DuplicateRegistration`] /
///   [`RegistrationError::CapacityExhausted`]: re-seating would violate
///   an admission invariant.
/// - [`RegistrationError::Cancelled`] / [`RegistrationError::Fatal`]:
///   cancellation or unclassified store failure.
#[instrument(
    skip(command, store, cancel),
    fields(
        command = command.command_type(),
        correlation_id = %command.correlation_id(),
        registration_id = %command.registration_id,
    )
)]
pub async fn revise_registration(
    command: &ReviseRegistration,
    store: &dyn Store,
    cancel: &CancellationToken,
) -> Result<Registration, RegistrationError> {
    run_with_retries(RetryPolicy::default(), cancel, || {
        revise_registration_once(command, store)
    })
    .await
}

async fn revise_registration_once(
    command: &ReviseRegistration,
    store: &dyn Store,
) -> Result<Registration, RegistrationError> {
    let intent = WriteIntent::Revise {
        entity: EntityKind::Registration,
        id: command.registration_id,
    };

    let mut session = store.begin().await.map_err(|e| classify(e, intent))?;

    let current = session
        .registration(command.registration_id)
        .await
        .map_err(|e| classify(e, intent))?
        .ok_or(RegistrationError::NotFound {
            entity: EntityKind::Registration,
            id: command.registration_id,
        })?;

    if command.changes.status.holds_seat() && !current.status.holds_seat() {
        let event = session
            .course_event(current.course_event_id)
            .await
            .map_err(|e| classify(e, intent))?
            .ok_or(RegistrationError::NotFound {
                entity: EntityKind::CourseEvent,
                id: current.course_event_id,
            })?;

        if session
            .active_pair_exists(current.participant_id, current.course_event_id)
            .await
            .map_err(|e| classify(e, intent))?
        {
            session.rollback().await.map_err(|e| classify(e, intent))?;
            return Err(RegistrationError::DuplicateRegistration {
                participant_id: current.participant_id,
                course_event_id: current.course_event_id,
            });
        }

        let seated = session
            .count_seated(current.course_event_id)
            .await
            .map_err(|e| classify(e, intent))?;
        if seated >= i64::from(event.seats) {
            session.rollback().await.map_err(|e| classify(e, intent))?;
            return Err(RegistrationError::CapacityExhausted {
                course_event_id: current.course_event_id,
                seats: event.seats,
            });
        }
    }

    let updated = session
        .update_registration(
            command.registration_id,
            command.expected_version,
            &command.changes,
        )
        .await
        .map_err(|e| classify(e, intent))?;

    match updated {
        Some(registration) => {
            session.commit().await.map_err(|e| classify(e, intent))?;
            info!(version = %registration.version, "registration revised");
            Ok(registration)
        }
        None => {
            // The row was present moments ago in this same transaction, so
            // zero affected rows can only mean a version mismatch.
            session.rollback().await.map_err(|e| classify(e, intent))?;
            Err(RegistrationError::VersionConflict {
                entity: EntityKind::Registration,
                id: command.registration_id,
            })
        }
    }
}

/// Cancels a registration behind the version guard, releasing its seat.
///
/// Occupancy is derived, so the seat frees the moment this commits; the
/// payment method on file is kept for any later refund.
///
/// # Errors
///
/// Same surface as [`revise_registration`], minus the re-seating
/// rejections.
#[instrument(
    skip(command, store, cancel),
    fields(
        command = command.command_type(),
        correlation_id = %command.correlation_id(),
        registration_id = %command.registration_id,
    )
)]
pub async fn cancel_registration(
    command: &CancelRegistration,
    store: &dyn Store,
    cancel: &CancellationToken,
) -> Result<Registration, RegistrationError> {
    run_with_retries(RetryPolicy::default(), cancel, || {
        cancel_registration_once(command, store)
    })
    .await
}

async fn cancel_registration_once(
    command: &CancelRegistration,
    store: &dyn Store,
) -> Result<Registration, RegistrationError> {
    let intent = WriteIntent::Revise {
        entity: EntityKind::Registration,
        id: command.registration_id,
    };

    let mut session = store.begin().await.map_err(|e| classify(e, intent))?;

    let current = session
        .registration(command.registration_id)
        .await
        .map_err(|e| classify(e, intent))?
        .ok_or(RegistrationError::NotFound {
            entity: EntityKind::Registration,
            id: command.registration_id,
        })?;

    let changes = RegistrationChanges {
        status: RegistrationStatus::Cancelled,
        payment_method_id: current.payment_method_id,
    };

    let updated = session
        .update_registration(command.registration_id, command.expected_version, &changes)
        .await
        .map_err(|e| classify(e, intent))?;

    match updated {
        Some(registration) => {
            session.commit().await.map_err(|e| classify(e, intent))?;
            info!("registration cancelled");
            Ok(registration)
        }
        None => {
            session.rollback().await.map_err(|e| classify(e, intent))?;
            Err(RegistrationError::VersionConflict {
                entity: EntityKind::Registration,
                id: command.registration_id,
            })
        }
    }
}
