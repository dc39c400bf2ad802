//! Per-meter history queries.

use crate::error::DatabaseError;
use crate::types::JobSummary;
use crate::{Error, Result};

use super::{JobRow, JobStore};

impl JobStore {
    /// Query export history for a meter with pagination
    ///
    /// Returns job summaries ordered by creation time (most recent first).
    /// Use limit and offset for pagination.
    pub async fn query_history(
        &self,
        meter_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobSummary>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT
                id, meter_id, format, compressed,
                start_datetime, end_datetime,
                state, progress, created_at, started_at, completed_at,
                result_ref, record_count, file_size_bytes,
                error_code, error_message
            FROM jobs
            WHERE meter_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(meter_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to query history: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(JobSummary::from).collect())
    }

    /// Count all jobs recorded for a meter
    ///
    /// Useful for pagination - returns the total across all pages.
    pub async fn count_history(&self, meter_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE meter_id = ?")
            .bind(meter_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count history: {}",
                    e
                )))
            })?;

        Ok(count)
    }
}
