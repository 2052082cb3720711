//! Registration database schema.
//!
//! No referential action cascades: dependents of a course event are
//! removed by the deletion coordinator, in the order the core crate
//! declares. The partial unique index enforces one seat-holding
//! registration per (participant, course event) pair while letting
//! cancelled rows stay behind as history.

/// SQL to create the course events table.
pub const CREATE_COURSE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS course_events (
    id          UUID PRIMARY KEY,
    title       VARCHAR(255) NOT NULL,
    starts_at   TIMESTAMPTZ NOT NULL,
    price_cents BIGINT NOT NULL,
    seats       INTEGER NOT NULL CHECK (seats > 0),
    version     BIGINT NOT NULL DEFAULT 1
);
";

/// SQL to create the registrations table and its indexes.
pub const CREATE_REGISTRATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS registrations (
    id                UUID PRIMARY KEY,
    participant_id    UUID NOT NULL,
    course_event_id   UUID NOT NULL REFERENCES course_events (id),
    status            VARCHAR(16) NOT NULL,
    payment_method_id UUID,
    created_at        TIMESTAMPTZ NOT NULL,
    version           BIGINT NOT NULL DEFAULT 1
);

CREATE UNIQUE INDEX IF NOT EXISTS registrations_active_participant_event_idx
    ON registrations (participant_id, course_event_id)
    WHERE status IN ('pending', 'paid');

CREATE INDEX IF NOT EXISTS registrations_course_event_id_idx
    ON registrations (course_event_id);
";

/// SQL to create the instructor assignments table.
pub const CREATE_INSTRUCTOR_ASSIGNMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS instructor_assignments (
    course_event_id UUID NOT NULL REFERENCES course_events (id),
    instructor_id   UUID NOT NULL,
    PRIMARY KEY (course_event_id, instructor_id)
);
";

/// SQL to create the location assignments table.
pub const CREATE_LOCATION_ASSIGNMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS location_assignments (
    course_event_id UUID NOT NULL REFERENCES course_events (id),
    location_id     UUID NOT NULL,
    PRIMARY KEY (course_event_id, location_id)
);
";

/// All schema statements, parents before children.
pub const SCHEMA: [&str; 4] = [
    CREATE_COURSE_EVENTS_TABLE,
    CREATE_REGISTRATIONS_TABLE,
    CREATE_INSTRUCTOR_ASSIGNMENTS_TABLE,
    CREATE_LOCATION_ASSIGNMENTS_TABLE,
];
