//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursedesk_core::entity::{
    CourseEvent, CourseEventChanges, NewRegistration, Registration, RegistrationChanges,
    RegistrationStatus,
};
use coursedesk_core::error::StoreError;
use coursedesk_core::store::{DependentTable, Store, StoreSession};
use coursedesk_core::version::VersionToken;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::schema;

/// PostgreSQL-backed store.
///
/// Sessions run SERIALIZABLE: the admission path reads the occupancy count
/// and inserts in one transaction, and it is this isolation level that
/// keeps two racers from both observing the last free seat. The loser
/// aborts with SQLSTATE 40001, which surfaces as
/// [`StoreError::Serialization`] and is retried upstream.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with a bounded pool.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` when the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Creates the schema objects if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` when a DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in schema::SCHEMA {
            sqlx::raw_sql(statement).execute(&self.pool).await?;
        }
        tracing::debug!("registration schema ensured");
        Ok(())
    }

    /// The underlying pool, for callers that need direct access (tests,
    /// health checks).
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Box::new(PgSession { tx }))
    }
}

struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreSession for PgSession {
    async fn course_event(&mut self, id: Uuid) -> Result<Option<CourseEvent>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, starts_at, price_cents, seats, version \
             FROM course_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(course_event_from_row).transpose()
    }

    async fn registration(&mut self, id: Uuid) -> Result<Option<Registration>, StoreError> {
        let row = sqlx::query(
            "SELECT id, participant_id, course_event_id, status, payment_method_id, \
                    created_at, version \
             FROM registrations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(registration_from_row).transpose()
    }

    async fn count_seated(&mut self, course_event_id: Uuid) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM registrations \
             WHERE course_event_id = $1 AND status IN ('pending', 'paid')",
        )
        .bind(course_event_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.try_get(0).map_err(map_sqlx_error)
    }

    async fn active_pair_exists(
        &mut self,
        participant_id: Uuid,
        course_event_id: Uuid,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS ( \
                 SELECT 1 FROM registrations \
                 WHERE participant_id = $1 AND course_event_id = $2 \
                   AND status IN ('pending', 'paid') \
             )",
        )
        .bind(participant_id)
        .bind(course_event_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.try_get(0).map_err(map_sqlx_error)
    }

    async fn insert_registration(
        &mut self,
        candidate: &NewRegistration,
    ) -> Result<Registration, StoreError> {
        let row = sqlx::query(
            "INSERT INTO registrations \
                 (id, participant_id, course_event_id, status, payment_method_id, \
                  created_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING version",
        )
        .bind(candidate.id)
        .bind(candidate.participant_id)
        .bind(candidate.course_event_id)
        .bind(candidate.status.as_str())
        .bind(candidate.payment_method_id)
        .bind(candidate.created_at)
        .bind(VersionToken::initial().raw())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
        Ok(Registration {
            id: candidate.id,
            participant_id: candidate.participant_id,
            course_event_id: candidate.course_event_id,
            status: candidate.status,
            payment_method_id: candidate.payment_method_id,
            created_at: candidate.created_at,
            version: VersionToken::from_raw(version),
        })
    }

    async fn update_course_event(
        &mut self,
        id: Uuid,
        expected: VersionToken,
        changes: &CourseEventChanges,
    ) -> Result<Option<CourseEvent>, StoreError> {
        let seats = i32::try_from(changes.seats)
            .map_err(|_| StoreError::Other(format!("seat capacity {} out of range", changes.seats)))?;
        let row = sqlx::query(
            "UPDATE course_events \
             SET title = $1, starts_at = $2, price_cents = $3, seats = $4, \
                 version = version + 1 \
             WHERE id = $5 AND version = $6 \
             RETURNING id, title, starts_at, price_cents, seats, version",
        )
        .bind(&changes.title)
        .bind(changes.starts_at)
        .bind(changes.price_cents)
        .bind(seats)
        .bind(id)
        .bind(expected.raw())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(course_event_from_row).transpose()
    }

    async fn update_registration(
        &mut self,
        id: Uuid,
        expected: VersionToken,
        changes: &RegistrationChanges,
    ) -> Result<Option<Registration>, StoreError> {
        let row = sqlx::query(
            "UPDATE registrations \
             SET status = $1, payment_method_id = $2, version = version + 1 \
             WHERE id = $3 AND version = $4 \
             RETURNING id, participant_id, course_event_id, status, payment_method_id, \
                       created_at, version",
        )
        .bind(changes.status.as_str())
        .bind(changes.payment_method_id)
        .bind(id)
        .bind(expected.raw())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(registration_from_row).transpose()
    }

    async fn delete_dependents(
        &mut self,
        table: DependentTable,
        course_event_id: Uuid,
    ) -> Result<u64, StoreError> {
        let sql = match table {
            DependentTable::Registrations => "DELETE FROM registrations WHERE course_event_id = $1",
            DependentTable::InstructorAssignments => {
                "DELETE FROM instructor_assignments WHERE course_event_id = $1"
            }
            DependentTable::LocationAssignments => {
                "DELETE FROM location_assignments WHERE course_event_id = $1"
            }
        };
        let result = sqlx::query(sql)
            .bind(course_event_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_course_event(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM course_events WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

fn course_event_from_row(row: &PgRow) -> Result<CourseEvent, StoreError> {
    let seats: i32 = row.try_get("seats").map_err(map_sqlx_error)?;
    let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
    Ok(CourseEvent {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        title: row.try_get("title").map_err(map_sqlx_error)?,
        starts_at: row.try_get("starts_at").map_err(map_sqlx_error)?,
        price_cents: row.try_get("price_cents").map_err(map_sqlx_error)?,
        seats: u32::try_from(seats)
            .map_err(|_| StoreError::Other(format!("stored seat capacity {seats} out of range")))?,
        version: VersionToken::from_raw(version),
    })
}

fn registration_from_row(row: &PgRow) -> Result<Registration, StoreError> {
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    let status = RegistrationStatus::parse(&status)
        .ok_or_else(|| StoreError::Other(format!("unknown registration status {status:?}")))?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map_sqlx_error)?;
    let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
    Ok(Registration {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        participant_id: row.try_get("participant_id").map_err(map_sqlx_error)?,
        course_event_id: row.try_get("course_event_id").map_err(map_sqlx_error)?,
        status,
        payment_method_id: row.try_get("payment_method_id").map_err(map_sqlx_error)?,
        created_at,
        version: VersionToken::from_raw(version),
    })
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            classify_database_code(db.code().as_deref(), db.constraint(), db.message())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Other(err.to_string()),
    }
}

/// SQLSTATE mapping: 23505 unique violation, 23503 foreign key violation,
/// 40001 serialization failure, 40P01 deadlock.
fn classify_database_code(
    code: Option<&str>,
    constraint: Option<&str>,
    message: &str,
) -> StoreError {
    match code {
        Some("23505") => StoreError::UniqueViolation {
            constraint: constraint.unwrap_or("unknown").to_owned(),
        },
        Some("23503") => StoreError::ForeignKeyViolation {
            constraint: constraint.unwrap_or("unknown").to_owned(),
        },
        Some("40001" | "40P01") => StoreError::Serialization(message.to_owned()),
        _ => StoreError::Other(message.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_code_maps_with_constraint_name() {
        let err = classify_database_code(
            Some("23505"),
            Some("registrations_active_participant_event_idx"),
            "duplicate key value",
        );
        assert_eq!(
            err,
            StoreError::UniqueViolation {
                constraint: "registrations_active_participant_event_idx".into(),
            }
        );
    }

    #[test]
    fn test_foreign_key_code_maps_to_foreign_key_violation() {
        let err = classify_database_code(
            Some("23503"),
            Some("registrations_course_event_id_fkey"),
            "violates foreign key constraint",
        );
        assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));
    }

    #[test]
    fn test_serialization_and_deadlock_codes_map_to_serialization() {
        for code in ["40001", "40P01"] {
            let err = classify_database_code(Some(code), None, "could not serialize access");
            assert!(matches!(err, StoreError::Serialization(_)), "code {code}");
        }
    }

    #[test]
    fn test_unknown_codes_map_to_other() {
        let err = classify_database_code(Some("22012"), None, "division by zero");
        assert!(matches!(err, StoreError::Other(_)));

        let err = classify_database_code(None, None, "mystery failure");
        assert!(matches!(err, StoreError::Other(_)));
    }
}
