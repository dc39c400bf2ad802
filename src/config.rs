//! Configuration types for meter-export

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Worker pool and export-execution configuration
///
/// Groups settings related to how export jobs are executed.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker executors pulling from the task queue (default: 2)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Rows between best-effort progress writes (default: 100)
    #[serde(default = "default_progress_interval_rows")]
    pub progress_interval_rows: u64,

    /// Per-job wall-clock ceiling in seconds (default: 300)
    ///
    /// A job that exceeds this ceiling is transitioned to FAILED with a
    /// timeout error rather than left stuck in RUNNING.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Backoff before redelivery when a job record is not yet visible
    /// to the worker, in milliseconds (default: 250)
    #[serde(default = "default_requeue_backoff_ms")]
    pub requeue_backoff_ms: u64,
}

impl WorkerConfig {
    /// The per-job ceiling as a [`Duration`]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// The requeue backoff as a [`Duration`]
    pub fn requeue_backoff(&self) -> Duration {
        Duration::from_millis(self.requeue_backoff_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            progress_interval_rows: default_progress_interval_rows(),
            job_timeout_secs: default_job_timeout_secs(),
            requeue_backoff_ms: default_requeue_backoff_ms(),
        }
    }
}

/// Data storage configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the SQLite job database (default: "./meter-export.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory export artifacts are written to (default: "./exports")
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            export_dir: default_export_dir(),
        }
    }
}

/// Main configuration for [`ExportService`]
///
/// All fields carry serde defaults, so a zero-configuration
/// `Config::default()` works out of the box.
///
/// [`ExportService`]: crate::service::ExportService
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool and execution settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Data storage and artifact directory settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Grace period for draining in-flight jobs on shutdown, in seconds
    /// (default: 10)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Event broadcast channel capacity (default: 1000)
    ///
    /// Subscribers falling behind by more than this many events receive a
    /// `Lagged` error from the broadcast receiver.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Config {
    /// The shutdown grace period as a [`Duration`]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_worker_count() -> usize {
    2
}

fn default_progress_interval_rows() -> u64 {
    100
}

fn default_job_timeout_secs() -> u64 {
    300
}

fn default_requeue_backoff_ms() -> u64 {
    250
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./meter-export.db")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_event_capacity() -> usize {
    1000
}
