//! # meter-export
//!
//! Asynchronous export pipeline for smart-meter readings. Callers submit an
//! export job (meter, time window, format, optional gzip) and immediately
//! get back a job id; a worker pool extracts the readings, serializes them
//! to CSV, JSON or XML and writes the artifact to an export directory. Job
//! state is durable in SQLite and every transition goes through an atomic
//! compare-and-set, so duplicate queue deliveries cannot double-process a
//! job.
//!
//! ## Example
//!
//! ```no_run
//! use meter_export::{Config, ExportFormat, ExportRequest, ReadingFilters};
//! use meter_export::service::ExportService;
//!
//! # async fn example() -> meter_export::Result<()> {
//! let service = ExportService::new(Config::default()).await?;
//!
//! let status = service
//!     .submit(ExportRequest {
//!         meter_id: "123".to_string(),
//!         format: ExportFormat::Csv,
//!         compressed: false,
//!         filters: ReadingFilters::new(
//!             "2025-07-01T00:00:00Z".parse().unwrap(),
//!             "2025-07-02T00:00:00Z".parse().unwrap(),
//!         ),
//!     })
//!     .await?;
//!
//! // Poll until the job reaches a terminal state
//! let status = service.get_status(status.job_id).await?;
//! println!("{}: {}", status.job_id, status.state);
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod config;
pub mod error;
pub mod extract;
pub mod queue;
pub mod serialize;
pub mod service;
pub mod sink;
pub mod store;
pub mod types;

mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{Download, ExportRequest, ExportService};
pub use types::{
    Event, ExportFormat, HistoryPage, JobId, JobState, JobStatus, JobSummary, ReadingFilters,
};

use std::sync::Arc;

/// Run the service until SIGINT/SIGTERM, then shut it down gracefully
///
/// Intended as the tail of an embedding process's main function.
pub async fn run_with_shutdown(service: Arc<ExportService>) {
    wait_for_signal().await;
    service.shutdown().await;
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl-C, shutting down");
    }
}
