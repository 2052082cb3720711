//! Commands for the registration context.

use coursedesk_core::command::Command;
use coursedesk_core::entity::{CourseEventChanges, RegistrationChanges};
use coursedesk_core::version::VersionToken;
use uuid::Uuid;

/// Command to reserve a seat on a course event.
#[derive(Debug, Clone)]
pub struct ReserveSeat {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The participant requesting the seat.
    pub participant_id: Uuid,
    /// The target course event.
    pub course_event_id: Uuid,
    /// Payment method on file, if any.
    pub payment_method_id: Option<Uuid>,
}

impl Command for ReserveSeat {
    fn command_type(&self) -> &'static str {
        "registration.reserve_seat"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to revise a course event's mutable attributes.
#[derive(Debug, Clone)]
pub struct ReviseCourseEvent {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The course event to revise.
    pub course_event_id: Uuid,
    /// The version token the caller last observed.
    pub expected_version: VersionToken,
    /// The full set of replacement values.
    pub changes: CourseEventChanges,
}

impl Command for ReviseCourseEvent {
    fn command_type(&self) -> &'static str {
        "registration.revise_course_event"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to revise a registration's status or payment method.
#[derive(Debug, Clone)]
pub struct ReviseRegistration {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The registration to revise.
    pub registration_id: Uuid,
    /// The version token the caller last observed.
    pub expected_version: VersionToken,
    /// The full set of replacement values.
    pub changes: RegistrationChanges,
}

impl Command for ReviseRegistration {
    fn command_type(&self) -> &'static str {
        "registration.revise_registration"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to cancel a registration, releasing its seat.
#[derive(Debug, Clone)]
pub struct CancelRegistration {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The registration to cancel.
    pub registration_id: Uuid,
    /// The version token the caller last observed.
    pub expected_version: VersionToken,
}

impl Command for CancelRegistration {
    fn command_type(&self) -> &'static str {
        "registration.cancel_registration"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}

/// Command to remove a course event together with its dependents.
#[derive(Debug, Clone)]
pub struct RemoveCourseEvent {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The course event to remove.
    pub course_event_id: Uuid,
}

impl Command for RemoveCourseEvent {
    fn command_type(&self) -> &'static str {
        "registration.remove_course_event"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }
}
