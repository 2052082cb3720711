//! Read-side queries for the registration context.
//!
//! Occupancy is a derived quantity: it is counted on demand, never stored.
//! Concurrent readers are safe; only the admission path needs the count
//! and a write in one transaction.

use coursedesk_core::entity::{CourseEvent, EntityKind, Registration};
use coursedesk_core::error::{RegistrationError, StoreError};
use coursedesk_core::retry::{RetryPolicy, run_with_retries};
use coursedesk_core::store::Store;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Derived occupancy of a course event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    /// Seat capacity.
    pub seats: u32,
    /// Seat-holding registrations.
    pub seated: u32,
    /// Seats still available.
    pub remaining: u32,
}

// Reads carry no write intent, so store signals map directly: contention
// is retryable, everything else fails closed.
fn classify_read(err: StoreError) -> RegistrationError {
    match err {
        StoreError::Serialization(message) => RegistrationError::Retryable(message),
        other => RegistrationError::Fatal(other.to_string()),
    }
}

/// Fetches a course event.
///
/// # Errors
///
/// [`RegistrationError::NotFound`] when absent; [`RegistrationError::Fatal`]
/// on unclassified store failure.
pub async fn course_event(
    store: &dyn Store,
    id: Uuid,
    cancel: &CancellationToken,
) -> Result<CourseEvent, RegistrationError> {
    run_with_retries(RetryPolicy::default(), cancel, || async move {
        let mut session = store.begin().await.map_err(classify_read)?;
        let event = session.course_event(id).await.map_err(classify_read)?;
        session.rollback().await.map_err(classify_read)?;
        event.ok_or(RegistrationError::NotFound {
            entity: EntityKind::CourseEvent,
            id,
        })
    })
    .await
}

/// Fetches a registration.
///
/// # Errors
///
/// [`RegistrationError::NotFound`] when absent; [`RegistrationError::Fatal`]
/// on unclassified store failure.
pub async fn registration(
    store: &dyn Store,
    id: Uuid,
    cancel: &CancellationToken,
) -> Result<Registration, RegistrationError> {
    run_with_retries(RetryPolicy::default(), cancel, || async move {
        let mut session = store.begin().await.map_err(classify_read)?;
        let registration = session.registration(id).await.map_err(classify_read)?;
        session.rollback().await.map_err(classify_read)?;
        registration.ok_or(RegistrationError::NotFound {
            entity: EntityKind::Registration,
            id,
        })
    })
    .await
}

/// Computes the occupancy of a course event.
///
/// # Errors
///
/// [`RegistrationError::NotFound`] when the course event is absent;
/// [`RegistrationError::Fatal`] on unclassified store failure.
pub async fn occupancy(
    store: &dyn Store,
    course_event_id: Uuid,
    cancel: &CancellationToken,
) -> Result<Occupancy, RegistrationError> {
    run_with_retries(RetryPolicy::default(), cancel, || async move {
        let mut session = store.begin().await.map_err(classify_read)?;
        let event = session
            .course_event(course_event_id)
            .await
            .map_err(classify_read)?
            .ok_or(RegistrationError::NotFound {
                entity: EntityKind::CourseEvent,
                id: course_event_id,
            })?;
        let seated = session
            .count_seated(course_event_id)
            .await
            .map_err(classify_read)?;
        session.rollback().await.map_err(classify_read)?;

        let seated = u32::try_from(seated).unwrap_or(u32::MAX);
        Ok(Occupancy {
            seats: event.seats,
            seated,
            remaining: event.seats.saturating_sub(seated),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use coursedesk_core::entity::RegistrationStatus;
    use coursedesk_core::version::VersionToken;
    use coursedesk_test_support::InMemoryStore;

    use super::*;

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

    fn seeded_registration(course_event_id: Uuid, status: RegistrationStatus) -> Registration {
        Registration {
            id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            course_event_id,
            status,
            payment_method_id: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
            version: VersionToken::initial(),
        }
    }

    #[tokio::test]
    async fn test_occupancy_counts_only_seat_holding_registrations() {
        // Arrange
        let store = InMemoryStore::new();
        let event = sample_event(5);
        store.seed_course_event(event.clone()).await;
        for status in [
            RegistrationStatus::Pending,
            RegistrationStatus::Paid,
            RegistrationStatus::Cancelled,
            RegistrationStatus::Refunded,
        ] {
            store
                .seed_registration(seeded_registration(event.id, status))
                .await;
        }

        // Act
        let occupancy = occupancy(&store, event.id, &CancellationToken::new())
            .await
            .unwrap();

        // Assert: cancelled and refunded rows do not count.
        assert_eq!(
            occupancy,
            Occupancy {
                seats: 5,
                seated: 2,
                remaining: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_occupancy_of_missing_event_is_not_found() {
        // Arrange
        let store = InMemoryStore::new();
        let absent = Uuid::new_v4();

        // Act
        let result = occupancy(&store, absent, &CancellationToken::new()).await;

        // Assert
        assert_eq!(
            result.unwrap_err(),
            RegistrationError::NotFound {
                entity: EntityKind::CourseEvent,
                id: absent,
            }
        );
    }

    #[tokio::test]
    async fn test_course_event_fetch_round_trips() {
        // Arrange
        let store = InMemoryStore::new();
        let event = sample_event(5);
        store.seed_course_event(event.clone()).await;

        // Act
        let fetched = course_event(&store, event.id, &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        assert_eq!(fetched, event);
    }

    #[tokio::test]
    async fn test_registration_fetch_of_missing_row_is_not_found() {
        // Arrange
        let store = InMemoryStore::new();
        let absent = Uuid::new_v4();

        // Act
        let result = registration(&store, absent, &CancellationToken::new()).await;

        // Assert
        assert_eq!(
            result.unwrap_err(),
            RegistrationError::NotFound {
                entity: EntityKind::Registration,
                id: absent,
            }
        );
    }
}
