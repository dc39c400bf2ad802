//! Core types for meter-export

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Unique identifier for an export job
///
/// Assigned at submission time and immutable for the life of the job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a fresh random job id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Durable job state
///
/// Transitions are monotone along Pending → Running → {Completed | Failed}
/// and are applied exclusively through [`JobStore::transition`].
///
/// [`JobStore::transition`]: crate::store::JobStore::transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Submitted and enqueued, not yet picked up by a worker
    Pending,
    /// A worker holds ownership and is extracting/serializing
    Running,
    /// Artifact written, result reference available
    Completed,
    /// Terminal failure, error recorded
    Failed,
}

impl JobState {
    /// Convert integer state code to JobState enum
    pub fn from_i32(state: i32) -> Self {
        match state {
            0 => JobState::Pending,
            1 => JobState::Running,
            2 => JobState::Completed,
            3 => JobState::Failed,
            _ => JobState::Failed, // Default to Failed for unknown state
        }
    }

    /// Convert JobState enum to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Completed => 2,
            JobState::Failed => 3,
        }
    }

    /// Lowercase state label as used in status responses
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Whether the state is terminal (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Human-readable status message for this state
    pub fn message(&self) -> &'static str {
        match self {
            JobState::Pending | JobState::Running => "Job is being processed",
            JobState::Completed => "Export completed successfully",
            JobState::Failed => "Export failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported export formats
///
/// A closed set selected once at submission and stored on the job record;
/// the serializer is dispatched on this variant, never re-derived from a
/// loosely typed string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated values with a header row
    Csv,
    /// A single JSON array of reading objects
    Json,
    /// XML document with one element per reading
    Xml,
}

impl ExportFormat {
    /// Lowercase format label
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Xml => "xml",
        }
    }

    /// File extension for artifacts in this format (without compression suffix)
    pub fn file_extension(&self) -> &'static str {
        self.as_str()
    }

    /// MIME type for download responses
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Xml => "application/xml",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "xml" => Ok(ExportFormat::Xml),
            other => Err(Error::Validation(format!(
                "unsupported export format '{other}' (expected csv, json or xml)"
            ))),
        }
    }
}

/// Time-range filters narrowing which readings are extracted
///
/// Immutable once stored on a job record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingFilters {
    /// Inclusive start of the export window (UTC)
    pub start: DateTime<Utc>,
    /// Inclusive end of the export window (UTC)
    pub end: DateTime<Utc>,
}

/// Maximum allowed export window
const MAX_RANGE_DAYS: i64 = 365;

/// Minimum allowed export window
const MIN_RANGE_SECS: i64 = 60;

impl ReadingFilters {
    /// Create a new filter window
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Validate the window against submission rules
    ///
    /// Rejects inverted ranges, windows shorter than one minute or longer
    /// than 365 days, and start timestamps in the future.
    pub fn validate(&self) -> crate::Result<()> {
        if self.end <= self.start {
            return Err(Error::Validation(
                "end_datetime must be after start_datetime".to_string(),
            ));
        }
        let range = self.end - self.start;
        if range < Duration::seconds(MIN_RANGE_SECS) {
            return Err(Error::Validation(
                "date range must be at least 1 minute".to_string(),
            ));
        }
        if range > Duration::days(MAX_RANGE_DAYS) {
            return Err(Error::Validation(
                "date range cannot exceed 365 days".to_string(),
            ));
        }
        if self.start > Utc::now() {
            return Err(Error::Validation(
                "start_datetime must be in the past".to_string(),
            ));
        }
        Ok(())
    }
}

/// One smart-meter reading row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Measurement timestamp (UTC)
    pub timestamp: DateTime<Utc>,
    /// Meter this reading belongs to
    pub meter_id: String,
    /// Energy consumed over the interval in kWh
    pub energy_kwh: f64,
    /// Instantaneous power in kW
    pub power_kw: f64,
    /// Line voltage in volts
    pub voltage_v: f64,
    /// Line current in amperes
    pub current_a: f64,
}

/// Round a value to a fixed number of decimal places
pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

impl Reading {
    /// Column names in serialization order, shared by all formats
    pub const COLUMNS: [&'static str; 6] = [
        "timestamp",
        "smart_meter_id",
        "energy_kwh",
        "power_kw",
        "voltage_v",
        "current_a",
    ];

    /// Timestamp rendered as RFC 3339 with seconds precision and `Z` suffix
    pub fn timestamp_str(&self) -> String {
        self.timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }

    /// Field values rendered with fixed precision, in [`Self::COLUMNS`] order
    ///
    /// Energy and power carry 3 decimals, voltage 1, current 2.
    pub fn field_strings(&self) -> [String; 6] {
        [
            self.timestamp_str(),
            self.meter_id.clone(),
            format!("{:.3}", self.energy_kwh),
            format!("{:.3}", self.power_kw),
            format!("{:.1}", self.voltage_v),
            format!("{:.2}", self.current_a),
        ]
    }
}

/// Structured failure description recorded on a FAILED job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Machine-readable error code (see [`crate::error::codes`])
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// Durable state for one export request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier
    pub id: JobId,
    /// Meter whose readings are exported
    pub meter_id: String,
    /// Requested output format
    pub format: ExportFormat,
    /// Whether the artifact is gzip-compressed
    pub compressed: bool,
    /// Time-range filters
    pub filters: ReadingFilters,
    /// Current state
    pub state: JobState,
    /// Progress percentage (0-100, monotone while running)
    pub progress: u8,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When a worker took ownership (None until RUNNING)
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque artifact reference (set iff COMPLETED)
    pub result_ref: Option<String>,
    /// Number of readings exported (set on COMPLETED)
    pub record_count: Option<i64>,
    /// Artifact size in bytes (set on COMPLETED)
    pub file_size_bytes: Option<i64>,
    /// Failure description (set iff FAILED)
    pub error: Option<JobError>,
}

/// Completed-artifact details surfaced in status and history responses
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Opaque artifact reference usable with the download operation
    pub result_ref: String,
    /// Artifact size in bytes
    pub file_size_bytes: i64,
    /// Number of readings in the artifact
    pub record_count: i64,
}

/// Point-in-time view of a job, returned by `get_status`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job identifier
    pub job_id: JobId,
    /// Current state
    pub state: JobState,
    /// Human-readable status message
    pub message: String,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Artifact details (present iff COMPLETED)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
    /// Failure description (present iff FAILED)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl From<JobRecord> for JobStatus {
    fn from(record: JobRecord) -> Self {
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

        JobStatus {
            job_id: record.id,
            state: record.state,
            message: record.state.message().to_string(),
            progress: record.progress,
            artifact,
            error: record.error,
        }
    }
}

/// Historical job summary returned by `list_history`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job identifier
    pub job_id: JobId,
    /// Meter the export targeted
    pub meter_id: String,
    /// Requested format
    pub format: ExportFormat,
    /// Whether the artifact is compressed
    pub compressed: bool,
    /// Final or current state
    pub state: JobState,
    /// Export window
    pub filters: ReadingFilters,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Terminal-state time (None while still in flight)
    pub completed_at: Option<DateTime<Utc>>,
    /// Artifact details for completed jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
}

/// One page of export history for a meter
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Meter the history belongs to
    pub meter_id: String,
    /// Total number of jobs recorded for this meter (across all pages)
    pub total: i64,
    /// Jobs in this page, ordered by creation time descending
    pub jobs: Vec<JobSummary>,
}

/// Event emitted during the job lifecycle
///
/// Events are advisory; the durable job record observed through status
/// polling remains the authoritative view.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted and enqueued
    Queued {
        /// Job identifier
        id: JobId,
        /// Meter the export targets
        meter_id: String,
    },

    /// A worker took ownership of the job
    Started {
        /// Job identifier
        id: JobId,
    },

    /// Progress update while running
    Progress {
        /// Job identifier
        id: JobId,
        /// Progress percentage (0-100)
        percent: u8,
    },

    /// Job completed and the artifact is available
    Completed {
        /// Job identifier
        id: JobId,
        /// Artifact reference
        result_ref: String,
        /// Number of readings exported
        record_count: i64,
    },

    /// Job failed terminally
    Failed {
        /// Job identifier
        id: JobId,
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // --- JobState integer encoding ---

    #[test]
    fn job_state_round_trips_through_i32_for_all_variants() {
        let cases = [
            (JobState::Pending, 0),
            (JobState::Running, 1),
            (JobState::Completed, 2),
            (JobState::Failed, 3),
        ];

        for (variant, expected_int) in cases {
            assert_eq!(
                variant.to_i32(),
                expected_int,
                "{variant:?} should encode to {expected_int}"
            );
            assert_eq!(
                JobState::from_i32(expected_int),
                variant,
                "{expected_int} should decode to {variant:?}"
            );
        }
    }

    #[test]
    fn job_state_from_unknown_integer_defaults_to_failed() {
        assert_eq!(
            JobState::from_i32(99),
            JobState::Failed,
            "unknown state 99 must fall back to Failed so corrupted DB rows surface visibly"
        );
        assert_eq!(JobState::from_i32(-1), JobState::Failed);
    }

    #[test]
    fn terminal_states_are_completed_and_failed_only() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    // --- ExportFormat parsing ---

    #[test]
    fn export_format_parses_known_variants_case_insensitively() {
        assert_eq!(ExportFormat::from_str("csv").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_str("JSON").unwrap(), ExportFormat::Json);
        assert_eq!(ExportFormat::from_str("Xml").unwrap(), ExportFormat::Xml);
    }

    #[test]
    fn export_format_rejects_unsupported_format_with_validation_error() {
        let err = ExportFormat::from_str("yaml").unwrap_err();
        assert!(
            matches!(err, Error::Validation(_)),
            "unsupported format must surface as a validation error, got {err:?}"
        );
        assert!(err.to_string().contains("yaml"));
    }

    #[test]
    fn export_format_content_types_match_download_media_types() {
        assert_eq!(ExportFormat::Csv.content_type(), "text/csv");
        assert_eq!(ExportFormat::Json.content_type(), "application/json");
        assert_eq!(ExportFormat::Xml.content_type(), "application/xml");
    }

    // --- ReadingFilters validation ---

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn filters_accept_a_valid_past_window() {
        let filters = ReadingFilters::new(ts("2025-07-01T00:00:00Z"), ts("2025-07-02T00:00:00Z"));
        filters.validate().unwrap();
    }

    #[test]
    fn filters_reject_inverted_range() {
        let filters = ReadingFilters::new(ts("2025-07-02T00:00:00Z"), ts("2025-07-01T00:00:00Z"));
        assert!(matches!(
            filters.validate().unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn filters_reject_equal_start_and_end() {
        let filters = ReadingFilters::new(ts("2025-07-01T00:00:00Z"), ts("2025-07-01T00:00:00Z"));
        assert!(filters.validate().is_err());
    }

    #[test]
    fn filters_reject_sub_minute_range() {
        let filters = ReadingFilters::new(ts("2025-07-01T00:00:00Z"), ts("2025-07-01T00:00:30Z"));
        let err = filters.validate().unwrap_err();
        assert!(err.to_string().contains("at least 1 minute"));
    }

    #[test]
    fn filters_reject_range_longer_than_a_year() {
        let filters = ReadingFilters::new(ts("2020-01-01T00:00:00Z"), ts("2021-06-01T00:00:00Z"));
        let err = filters.validate().unwrap_err();
        assert!(err.to_string().contains("365 days"));
    }

    #[test]
    fn filters_reject_future_start() {
        let start = Utc::now() + Duration::days(2);
        let filters = ReadingFilters::new(start, start + Duration::days(1));
        let err = filters.validate().unwrap_err();
        assert!(err.to_string().contains("in the past"));
    }

    // --- Reading rendering ---

    #[test]
    fn reading_fields_render_with_fixed_precision() {
        let reading = Reading {
            timestamp: ts("2025-07-01T12:00:00Z"),
            meter_id: "123".to_string(),
            energy_kwh: 0.0333333,
            power_kw: 2.123456,
            voltage_v: 229.94,
            current_a: 9.2345,
        };

        let fields = reading.field_strings();
        assert_eq!(fields[0], "2025-07-01T12:00:00Z");
        assert_eq!(fields[1], "123");
        assert_eq!(fields[2], "0.033");
        assert_eq!(fields[3], "2.123");
        assert_eq!(fields[4], "229.9");
        assert_eq!(fields[5], "9.23");
    }

    #[test]
    fn round_to_truncates_float_noise() {
        assert_eq!(round_to(0.1 + 0.2, 3), 0.3);
        assert_eq!(round_to(229.94999, 1), 229.9);
    }

    // --- JobId ---

    #[test]
    fn job_id_round_trips_through_string() {
        let id = JobId::generate();
        let parsed = JobId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_id_rejects_malformed_uuid() {
        assert!(JobId::from_str("not-a-uuid").is_err());
    }

    // --- Status projection ---

    fn record(state: JobState) -> JobRecord {
        JobRecord {
            id: JobId::generate(),
            meter_id: "m1".to_string(),
            format: ExportFormat::Csv,
            compressed: false,
            filters: ReadingFilters::new(ts("2025-07-01T00:00:00Z"), ts("2025-07-02T00:00:00Z")),
            state,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result_ref: None,
            record_count: None,
            file_size_bytes: None,
            error: None,
        }
    }

    #[test]
    fn status_projection_only_exposes_artifact_when_completed() {
        let mut completed = record(JobState::Completed);
        completed.result_ref = Some("export.csv".to_string());
        completed.record_count = Some(3);
        completed.file_size_bytes = Some(120);
        let status = JobStatus::from(completed);
        assert!(status.artifact.is_some());

        // A running job with a stray result_ref must not surface an artifact
        let mut running = record(JobState::Running);
        running.result_ref = Some("export.csv".to_string());
        let status = JobStatus::from(running);
        assert!(status.artifact.is_none());
    }
}
