//! Job CRUD, guarded state transitions, and progress writes.

use crate::error::DatabaseError;
use crate::types::{JobId, JobRecord, JobState};
use crate::{Error, Result};

use super::{JobRow, JobStore, NewJob, TransitionFields};

impl JobStore {
    /// Insert a new job record in PENDING state
    ///
    /// Fails with a constraint violation if the job id collides with an
    /// existing record (should not happen with v4 ids, but is checked).
    pub async fn insert(&self, job: &NewJob) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, meter_id, format, compressed,
                start_datetime, end_datetime,
                state, progress, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.meter_id)
        .bind(job.format.as_str())
        .bind(job.compressed as i32)
        .bind(job.filters.start.timestamp())
        .bind(job.filters.end.timestamp())
        .bind(JobState::Pending.to_i32())
        .bind(0i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::Database(
                DatabaseError::ConstraintViolation(format!("job {} already exists", job.id)),
            ),
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert job: {}",
                e
            ))),
        })?;

        Ok(())
    }

    /// Get a job record by id
    pub async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT
                id, meter_id, format, compressed,
                start_datetime, end_datetime,
                state, progress, created_at, started_at, completed_at,
                result_ref, record_count, file_size_bytes,
                error_code, error_message
            FROM jobs
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get job: {}",
                e
            )))
        })?;

        Ok(row.map(JobRecord::from))
    }

    /// Atomic compare-and-set state transition
    ///
    /// Applies `fields` and moves the job to `new` only if the stored state
    /// equals `expected`. A mismatch fails with [`Error::Conflict`] and
    /// applies nothing; an unknown id fails with [`Error::NotFound`]. This
    /// is the sole mutation path for `state` and what guarantees at most one
    /// active execution per job under at-least-once queue delivery.
    pub async fn transition(
        &self,
        id: JobId,
        expected: JobState,
        new: JobState,
        fields: TransitionFields,
    ) -> Result<()> {
        let (error_code, error_message) = match fields.error {
            Some(err) => (Some(err.code), Some(err.message)),
            None => (None, None),
        };

        let rows = sqlx::query(
            r#"
            UPDATE jobs SET
                state = ?,
                progress = COALESCE(?, progress),
                started_at = COALESCE(?, started_at),
                completed_at = COALESCE(?, completed_at),
                result_ref = COALESCE(?, result_ref),
                record_count = COALESCE(?, record_count),
                file_size_bytes = COALESCE(?, file_size_bytes),
                error_code = COALESCE(?, error_code),
                error_message = COALESCE(?, error_message)
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(new.to_i32())
        .bind(fields.progress.map(|p| p as i64))
        .bind(fields.started_at.map(|t| t.timestamp()))
        .bind(fields.completed_at.map(|t| t.timestamp()))
        .bind(&fields.result_ref)
        .bind(fields.record_count)
        .bind(fields.file_size_bytes)
        .bind(&error_code)
        .bind(&error_message)
        .bind(id.to_string())
        .bind(expected.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to transition job: {}",
                e
            )))
        })?
        .rows_affected();

        if rows == 1 {
            return Ok(());
        }

        // CAS rejected: distinguish unknown job from state mismatch
        match self.get(id).await? {
            None => Err(Error::NotFound(id.to_string())),
            Some(_) => Err(Error::Conflict {
                id: id.to_string(),
                expected: expected.as_str().to_string(),
            }),
        }
    }

    /// Best-effort progress write while a job is RUNNING
    ///
    /// Not a state transition: never changes `state`, never decreases
    /// `progress` (monotone guard in SQL), and silently does nothing once
    /// the job leaves RUNNING.
    pub async fn update_progress(&self, id: JobId, progress: u8) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET progress = MAX(progress, ?) WHERE id = ? AND state = ?",
        )
        .bind(progress.min(100) as i64)
        .bind(id.to_string())
        .bind(JobState::Running.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update progress: {}",
                e
            )))
        })?;

        Ok(())
    }
}
