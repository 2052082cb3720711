//! Translation of store failure signals into the caller-facing taxonomy.

use uuid::Uuid;

use crate::entity::EntityKind;
use crate::error::{RegistrationError, StoreError};

/// What the operation was attempting when the store signalled a failure.
///
/// Classification needs this context: the same unique violation means
/// "duplicate registration" during an admission and an unexpected fault
/// anywhere else.
#[derive(Debug, Clone, Copy)]
pub enum WriteIntent {
    /// Admitting a candidate registration.
    Reserve {
        /// The participant requesting a seat.
        participant_id: Uuid,
        /// The target course event.
        course_event_id: Uuid,
    },
    /// Conditionally updating an existing row.
    Revise {
        /// Which entity kind is being written.
        entity: EntityKind,
        /// The target row.
        id: Uuid,
    },
    /// Removing a course event and its dependents.
    Remove {
        /// The course event being removed.
        course_event_id: Uuid,
    },
}

/// Maps a raw store signal onto exactly one taxonomy value.
///
/// Unrecognized signals classify as [`RegistrationError::Fatal`]: the
/// mapping fails closed rather than guessing.
#[must_use]
pub fn classify(err: StoreError, intent: WriteIntent) -> RegistrationError {
    match (err, intent) {
        (
            StoreError::UniqueViolation { .. },
            WriteIntent::Reserve {
                participant_id,
                course_event_id,
            },
        ) => RegistrationError::DuplicateRegistration {
            participant_id,
            course_event_id,
        },
        (StoreError::Serialization(message), _) => RegistrationError::Retryable(message),
        (err, _) => RegistrationError::Fatal(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve_intent() -> WriteIntent {
        WriteIntent::Reserve {
            participant_id: Uuid::new_v4(),
            course_event_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_unique_violation_during_reserve_is_duplicate_registration() {
        // Arrange
        let participant_id = Uuid::new_v4();
        let course_event_id = Uuid::new_v4();
        let err = StoreError::UniqueViolation {
            constraint: "registrations_active_participant_event_idx".into(),
        };

        // Act
        let classified = classify(
            err,
            WriteIntent::Reserve {
                participant_id,
                course_event_id,
            },
        );

        // Assert
        assert_eq!(
            classified,
            RegistrationError::DuplicateRegistration {
                participant_id,
                course_event_id,
            }
        );
    }

    #[test]
    fn test_unique_violation_outside_reserve_is_fatal() {
        let err = StoreError::UniqueViolation {
            constraint: "course_events_pkey".into(),
        };

        let classified = classify(
            err,
            WriteIntent::Revise {
                entity: EntityKind::CourseEvent,
                id: Uuid::new_v4(),
            },
        );

        assert!(matches!(classified, RegistrationError::Fatal(_)));
    }

    #[test]
    fn test_serialization_failure_is_retryable_for_every_intent() {
        for intent in [
            reserve_intent(),
            WriteIntent::Revise {
                entity: EntityKind::Registration,
                id: Uuid::new_v4(),
            },
            WriteIntent::Remove {
                course_event_id: Uuid::new_v4(),
            },
        ] {
            let classified = classify(StoreError::Serialization("40001".into()), intent);
            assert!(classified.is_retryable(), "intent {intent:?} did not classify as retryable");
        }
    }

    #[test]
    fn test_foreign_key_violation_is_fatal() {
        let err = StoreError::ForeignKeyViolation {
            constraint: "registrations_course_event_id_fkey".into(),
        };
        assert!(matches!(
            classify(err, reserve_intent()),
            RegistrationError::Fatal(_)
        ));
    }

    #[test]
    fn test_unrecognized_signals_fail_closed() {
        for err in [
            StoreError::Unavailable("connection refused".into()),
            StoreError::Other("out of disk".into()),
        ] {
            assert!(matches!(
                classify(err, reserve_intent()),
                RegistrationError::Fatal(_)
            ));
        }
    }
}
