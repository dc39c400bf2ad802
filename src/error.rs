//! Error types for meter-export
//!
//! This module provides the error taxonomy for the export pipeline:
//! - Submission-time errors returned synchronously to the caller
//!   (`Validation`, `NotFound`, `NotReady`)
//! - Worker-side errors recorded on the job record (`DataUnavailable`,
//!   `Serialization`, timeouts) and never thrown across the async boundary
//! - Infrastructure errors (`Database`, `Queue`, `Io`) used internally

use thiserror::Error;

/// Result type alias for meter-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for meter-export
///
/// Errors raised before a job is enqueued are returned to the submitter;
/// errors raised during worker execution are recorded in the job record's
/// error field and only observable through status polling.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid submission input (unsupported format, malformed filters)
    #[error("validation error: {0}")]
    Validation(String),

    /// Job not found
    #[error("job {0} not found")]
    NotFound(String),

    /// Download requested before the job reached COMPLETED
    #[error("job {id} is not ready for download (state: {state})")]
    NotReady {
        /// The job whose artifact was requested
        id: String,
        /// The job's current state
        state: String,
    },

    /// Guarded state transition rejected because the stored state did not
    /// match the expected state (duplicate delivery, concurrent worker)
    #[error("conflicting transition for job {id}: expected state {expected}")]
    Conflict {
        /// The job whose transition was rejected
        id: String,
        /// The state the caller expected to find
        expected: String,
    },

    /// The reading store was unreachable or the meter is unknown
    #[error("reading data unavailable: {0}")]
    DataUnavailable(String),

    /// Row data could not be encoded in the requested format
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Job exceeded its wall-clock ceiling
    #[error("export timed out after {0} seconds")]
    Timeout(u64),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Task queue failure (closed channel, enqueue after shutdown)
    #[error("queue error: {0}")]
    Queue(String),

    /// I/O error while writing an artifact
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., duplicate job id)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Machine-readable error codes recorded on failed jobs
pub mod codes {
    /// The meter id did not resolve to a known smart meter
    pub const SMART_METER_NOT_FOUND: &str = "SMART_METER_NOT_FOUND";
    /// The reading store was unreachable during extraction
    pub const DATA_UNAVAILABLE: &str = "DATA_UNAVAILABLE";
    /// The job exceeded its wall-clock ceiling
    pub const EXPORT_TIMEOUT: &str = "EXPORT_TIMEOUT";
    /// Any other extraction/serialization/sink failure
    pub const EXPORT_FAILED: &str = "EXPORT_FAILED";
}

impl Error {
    /// Map a worker-side failure to the error code recorded on the job.
    pub fn job_error_code(&self) -> &'static str {
        match self {
            Error::DataUnavailable(msg) if msg.to_lowercase().contains("not found") => {
                codes::SMART_METER_NOT_FOUND
            }
            Error::DataUnavailable(_) => codes::DATA_UNAVAILABLE,
            Error::Timeout(_) => codes::EXPORT_TIMEOUT,
            _ => codes::EXPORT_FAILED,
        }
    }
}
