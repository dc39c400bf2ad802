//! Job store — SQLite persistence for export job records.
//!
//! The store is the single source of truth for job state. All state
//! mutations go through [`JobStore::transition`], an atomic compare-and-set
//! that is the concurrency guard against duplicate queue deliveries.
//!
//! ## Submodules
//!
//! Methods on [`JobStore`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`jobs`] — Job CRUD, guarded transitions, progress writes
//! - [`history`] — Per-meter history queries

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use uuid::Uuid;

use crate::types::{
    ArtifactInfo, ExportFormat, JobError, JobId, JobRecord, JobState, JobSummary, ReadingFilters,
};

mod history;
mod jobs;
mod migrations;

/// New job to be inserted into the store
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Pre-assigned job id
    pub id: JobId,
    /// Meter whose readings are exported
    pub meter_id: String,
    /// Requested output format
    pub format: ExportFormat,
    /// Whether the artifact is gzip-compressed
    pub compressed: bool,
    /// Export time window
    pub filters: ReadingFilters,
}

/// Fields applied atomically alongside a state transition
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    /// Progress percentage to set
    pub progress: Option<u8>,
    /// Worker-ownership timestamp (set on PENDING → RUNNING)
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal-state timestamp
    pub completed_at: Option<DateTime<Utc>>,
    /// Artifact reference (set on COMPLETED)
    pub result_ref: Option<String>,
    /// Number of readings exported
    pub record_count: Option<i64>,
    /// Artifact size in bytes
    pub file_size_bytes: Option<i64>,
    /// Failure description (set on FAILED)
    pub error: Option<JobError>,
}

impl TransitionFields {
    /// Fields for taking RUNNING ownership
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(now),
            ..Default::default()
        }
    }

    /// Fields for a successful completion
    pub fn completed(
        now: DateTime<Utc>,
        result_ref: String,
        record_count: i64,
        file_size_bytes: i64,
    ) -> Self {
        Self {
            progress: Some(100),
            completed_at: Some(now),
            result_ref: Some(result_ref),
            record_count: Some(record_count),
            file_size_bytes: Some(file_size_bytes),
            ..Default::default()
        }
    }

    /// Fields for a terminal failure
    pub fn failed(now: DateTime<Utc>, error: JobError) -> Self {
        Self {
            completed_at: Some(now),
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Job record as stored in SQLite
///
/// Timestamps are unix seconds; enums are stored as integer codes
/// (state) or lowercase labels (format).
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Job id (UUID text)
    pub id: String,
    /// Meter identifier
    pub meter_id: String,
    /// Format label ("csv", "json", "xml")
    pub format: String,
    /// Compression flag (0 = plain, 1 = gzip)
    pub compressed: i32,
    /// Export window start (unix seconds)
    pub start_datetime: i64,
    /// Export window end (unix seconds)
    pub end_datetime: i64,
    /// State code (see [`JobState::to_i32`])
    pub state: i32,
    /// Progress percentage
    pub progress: i64,
    /// Unix timestamp when the job was submitted
    pub created_at: i64,
    /// Unix timestamp when a worker took ownership
    pub started_at: Option<i64>,
    /// Unix timestamp when the job reached a terminal state
    pub completed_at: Option<i64>,
    /// Artifact reference
    pub result_ref: Option<String>,
    /// Number of readings exported
    pub record_count: Option<i64>,
    /// Artifact size in bytes
    pub file_size_bytes: Option<i64>,
    /// Machine-readable failure code
    pub error_code: Option<String>,
    /// Failure message
    pub error_message: Option<String>,
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        let error = match (row.error_code, row.error_message) {
            (Some(code), Some(message)) => Some(JobError { code, message }),
            (None, Some(message)) => Some(JobError {
                code: crate::error::codes::EXPORT_FAILED.to_string(),
                message,
            }),
            _ => None,
        };

        JobRecord {
            id: JobId(Uuid::parse_str(&row.id).unwrap_or_default()),
            meter_id: row.meter_id,
            format: row.format.parse().unwrap_or(ExportFormat::Csv),
            compressed: row.compressed != 0,
            filters: ReadingFilters::new(from_unix(row.start_datetime), from_unix(row.end_datetime)),
            state: JobState::from_i32(row.state),
            progress: row.progress.clamp(0, 100) as u8,
            created_at: from_unix(row.created_at),
            started_at: row.started_at.map(from_unix),
            completed_at: row.completed_at.map(from_unix),
            result_ref: row.result_ref,
            record_count: row.record_count,
            file_size_bytes: row.file_size_bytes,
            error,
        }
    }
}

impl From<JobRow> for JobSummary {
    fn from(row: JobRow) -> Self {
        let record = JobRecord::from(row);
        let artifact = match (
            record.state,
            record.result_ref,
            record.file_size_bytes,
            record.record_count,
        ) {
            (JobState::Completed, Some(result_ref), Some(size), Some(count)) => Some(ArtifactInfo {
                result_ref,
                file_size_bytes: size,
                record_count: count,
            }),
            _ => None,
        };

        JobSummary {
            job_id: record.id,
            meter_id: record.meter_id,
            format: record.format,
            compressed: record.compressed,
            state: record.state,
            filters: record.filters,
            created_at: record.created_at,
            completed_at: record.completed_at,
            artifact,
        }
    }
}

/// Job store handle for meter-export
pub struct JobStore {
    pool: SqlitePool,
}
