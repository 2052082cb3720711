//! Seat reservation admission control.
//!
//! Admission is the only way a registration comes into existence. One
//! attempt is one transactional scope: the occupancy count and the insert
//! share a session, so the store, not this module, serializes concurrent
//! writers deciding over the last seat.

use coursedesk_core::classify::{WriteIntent, classify};
use coursedesk_core::clock::Clock;
use coursedesk_core::command::Command;
use coursedesk_core::entity::{EntityKind, NewRegistration, Registration, RegistrationStatus};
use coursedesk_core::error::RegistrationError;
use coursedesk_core::retry::{RetryPolicy, run_with_retries};
use coursedesk_core::store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::commands::ReserveSeat;

/// Admits the candidate registration, or rejects it.
///
/// Capacity exhaustion and duplicate registration are expected outcomes,
/// returned as their own variants; only transient serialization failures
/// re-run the attempt (the occupancy may have changed, so the whole
/// count-then-insert runs again). Cancelling `cancel` abandons the open
/// transaction and nothing persists.
///
/// # Errors
///
/// - [`RegistrationError::NotFound`]: the course event does not exist.
/// - [`RegistrationError::CapacityExhausted`]: every seat is taken.
/// - [`RegistrationError::DuplicateRegistration`]: the participant
///   already holds a seat for this event.
/// - [`RegistrationError::Cancelled`]: the token fired mid-operation.
/// - [`RegistrationError::Fatal`]: unclassified store failure, or
///   contention that outlasted the retry budget.
#[instrument(
    skip(command, clock, store, cancel),
    fields(
        command = command.command_type(),
        correlation_id = %command.correlation_id(),
        course_event_id = %command.course_event_id,
        participant_id = %command.participant_id,
    )
)]
pub async fn reserve(
    command: &ReserveSeat,
    clock: &dyn Clock,
    store: &dyn Store,
    cancel: &CancellationToken,
) -> Result<Registration, RegistrationError> {
    run_with_retries(RetryPolicy::default(), cancel, || {
        reserve_once(command, clock, store)
    })
    .await
}

async fn reserve_once(
    command: &ReserveSeat,
    clock: &dyn Clock,
    store: &dyn Store,
) -> Result<Registration, RegistrationError> {
    let intent = WriteIntent::Reserve {
        participant_id: command.participant_id,
        course_event_id: command.course_event_id,
    };

    let mut session = store.begin().await.map_err(|e| classify(e, intent))?;

    let event = session
        .course_event(command.course_event_id)
        .await
        .map_err(|e| classify(e, intent))?
        .ok_or(RegistrationError::NotFound {
            entity: EntityKind::CourseEvent,
            id: command.course_event_id,
        })?;

    let seated = session
        .count_seated(command.course_event_id)
        .await
        .map_err(|e| classify(e, intent))?;

    if seated >= i64::from(event.seats) {
        session.rollback().await.map_err(|e| classify(e, intent))?;
        info!(seated, seats = event.seats, "admission rejected: capacity exhausted");
        return Err(RegistrationError::CapacityExhausted {
            course_event_id: command.course_event_id,
            seats: event.seats,
        });
    }

    let candidate = NewRegistration {
        id: Uuid::new_v4(),
        participant_id: command.participant_id,
        course_event_id: command.course_event_id,
        status: RegistrationStatus::Pending,
        payment_method_id: command.payment_method_id,
        created_at: clock.now(),
    };

    let registration = session
        .insert_registration(&candidate)
        .await
        .map_err(|e| classify(e, intent))?;

    session.commit().await.map_err(|e| classify(e, intent))?;

    info!(registration_id = %registration.id, "registration admitted");
    Ok(registration)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use coursedesk_core::entity::CourseEvent;
    use coursedesk_core::error::StoreError;
    use coursedesk_core::version::VersionToken;
    use coursedesk_test_support::{FaultPoint, FixedClock, InMemoryStore};

    use super::*;

    fn fixed_clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap())
    }

    fn sample_event(seats: u32) -> CourseEvent {
        CourseEvent {
            id: Uuid::new_v4(),
            title: "Intro to Pottery".into(),
            starts_at: Utc.with_ymd_and_hms(2026, 4, 1, 18, 0, 0).unwrap(),
            price_cents: 4_900,
            seats,
            version: VersionToken::initial(),
        }
    }

    fn seeded_registration(
        course_event_id: Uuid,
        participant_id: Uuid,
        status: RegistrationStatus,
    ) -> Registration {
        Registration {
            id: Uuid::new_v4(),
            participant_id,
            course_event_id,
            status,
            payment_method_id: None,
            created_at: fixed_clock().0,
            version: VersionToken::initial(),
        }
    }

    fn reserve_command(course_event_id: Uuid) -> ReserveSeat {
        ReserveSeat {
            correlation_id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            course_event_id,
            payment_method_id: None,
        }
    }

    #[tokio::test]
    async fn test_reserve_admits_when_a_seat_is_free() {
        // Arrange
        let store = InMemoryStore::new();
        let event = sample_event(2);
        store.seed_course_event(event.clone()).await;
        let clock = fixed_clock();
        let command = reserve_command(event.id);

        // Act
        let registration = reserve(&command, &clock, &store, &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        assert_eq!(registration.participant_id, command.participant_id);
        assert_eq!(registration.course_event_id, event.id);
        assert_eq!(registration.status, RegistrationStatus::Pending);
        assert_eq!(registration.created_at, clock.0);
        assert_eq!(registration.version, VersionToken::initial());

        let contents = store.contents().await;
        assert_eq!(contents.registrations.len(), 1);
        assert!(contents.registrations.contains_key(&registration.id));
    }

    #[tokio::test]
    async fn test_reserve_rejects_when_capacity_is_exhausted() {
        // Arrange
        let store = InMemoryStore::new();
        let event = sample_event(1);
        store.seed_course_event(event.clone()).await;
        store
            .seed_registration(seeded_registration(
                event.id,
                Uuid::new_v4(),
                RegistrationStatus::Paid,
            ))
            .await;
        let command = reserve_command(event.id);

        // Act
        let result = reserve(&command, &fixed_clock(), &store, &CancellationToken::new()).await;

        // Assert
        assert_eq!(
            result.unwrap_err(),
            RegistrationError::CapacityExhausted {
                course_event_id: event.id,
                seats: 1,
            }
        );
        // Rejection leaves occupancy untouched.
        assert_eq!(store.contents().await.registrations.len(), 1);
    }

    #[tokio::test]
    async fn test_reserve_rejects_duplicate_participant() {
        // Arrange
        let store = InMemoryStore::new();
        let event = sample_event(5);
        store.seed_course_event(event.clone()).await;
        let participant_id = Uuid::new_v4();
        store
            .seed_registration(seeded_registration(
                event.id,
                participant_id,
                RegistrationStatus::Pending,
            ))
            .await;
        let command = ReserveSeat {
            participant_id,
            ..reserve_command(event.id)
        };

        // Act
        let result = reserve(&command, &fixed_clock(), &store, &CancellationToken::new()).await;

        // Assert
        assert_eq!(
            result.unwrap_err(),
            RegistrationError::DuplicateRegistration {
                participant_id,
                course_event_id: event.id,
            }
        );
        assert_eq!(store.contents().await.registrations.len(), 1);
    }

    #[tokio::test]
    async fn test_reserve_returns_not_found_for_missing_course_event() {
        // Arrange
        let store = InMemoryStore::new();
        let command = reserve_command(Uuid::new_v4());

        // Act
        let result = reserve(&command, &fixed_clock(), &store, &CancellationToken::new()).await;

        // Assert
        assert_eq!(
            result.unwrap_err(),
            RegistrationError::NotFound {
                entity: EntityKind::CourseEvent,
                id: command.course_event_id,
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_registration_neither_occupies_nor_blocks() {
        // Arrange: a cancelled registration on a one-seat event.
        let store = InMemoryStore::new();
        let event = sample_event(1);
        store.seed_course_event(event.clone()).await;
        let participant_id = Uuid::new_v4();
        store
            .seed_registration(seeded_registration(
                event.id,
                participant_id,
                RegistrationStatus::Cancelled,
            ))
            .await;

        // Act: the same participant registers again.
        let command = ReserveSeat {
            participant_id,
            ..reserve_command(event.id)
        };
        let result = reserve(&command, &fixed_clock(), &store, &CancellationToken::new()).await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(store.contents().await.registrations.len(), 2);
    }

    #[tokio::test]
    async fn test_reserve_retries_through_transient_contention() {
        // Arrange
        let store = InMemoryStore::new();
        let event = sample_event(3);
        store.seed_course_event(event.clone()).await;
        store.fail_once(
            FaultPoint::CountSeated,
            StoreError::Serialization("could not serialize access".into()),
        );
        let command = reserve_command(event.id);

        // Act
        let result = reserve(&command, &fixed_clock(), &store, &CancellationToken::new()).await;

        // Assert: the first attempt failed, the re-run admitted.
        assert!(result.is_ok());
        assert_eq!(store.contents().await.registrations.len(), 1);
    }

    #[tokio::test]
    async fn test_reserve_escalates_persistent_contention_to_fatal() {
        // Arrange: more scripted failures than the retry budget allows.
        let store = InMemoryStore::new();
        let event = sample_event(3);
        store.seed_course_event(event.clone()).await;
        for _ in 0..3 {
            store.fail_once(
                FaultPoint::CountSeated,
                StoreError::Serialization("could not serialize access".into()),
            );
        }
        let command = reserve_command(event.id);

        // Act
        let result = reserve(&command, &fixed_clock(), &store, &CancellationToken::new()).await;

        // Assert
        assert!(matches!(result.unwrap_err(), RegistrationError::Fatal(_)));
        assert!(store.contents().await.registrations.is_empty());
    }

    #[tokio::test]
    async fn test_reserve_fails_closed_on_unclassified_store_errors() {
        // Arrange
        let store = InMemoryStore::new();
        let event = sample_event(3);
        store.seed_course_event(event.clone()).await;
        store.fail_once(
            FaultPoint::InsertRegistration,
            StoreError::Other("out of disk".into()),
        );
        let command = reserve_command(event.id);

        // Act
        let result = reserve(&command, &fixed_clock(), &store, &CancellationToken::new()).await;

        // Assert
        assert!(matches!(result.unwrap_err(), RegistrationError::Fatal(_)));
        assert!(store.contents().await.registrations.is_empty());
    }

    #[tokio::test]
    async fn test_reserve_respects_a_cancelled_token() {
        // Arrange
        let store = InMemoryStore::new();
        let event = sample_event(3);
        store.seed_course_event(event.clone()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let command = reserve_command(event.id);

        // Act
        let result = reserve(&command, &fixed_clock(), &store, &cancel).await;

        // Assert: nothing persisted.
        assert_eq!(result.unwrap_err(), RegistrationError::Cancelled);
        assert!(store.contents().await.registrations.is_empty());
    }
}
