//! Export service façade — submission, status, download and history.
//!
//! [`ExportService`] owns the store, queue, sink and worker pool, and is the
//! only surface callers interact with. Submission is validate → insert →
//! enqueue, in that order: the durable record always exists before the
//! queue message that references it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, broadcast};

use crate::config::Config;
use crate::error::Error;
use crate::extract::{ReadingSource, SyntheticReadingSource};
use crate::queue::{InMemoryQueue, TaskQueue};
use crate::sink::{ArtifactSink, FilesystemSink};
use crate::store::{JobStore, NewJob};
use crate::types::{Event, ExportFormat, HistoryPage, JobId, JobState, JobStatus, ReadingFilters};
use crate::worker::{WorkerContext, WorkerPool};
use crate::Result;

/// Default page size for history listings
const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Upper bound on a single history page
const MAX_HISTORY_LIMIT: i64 = 200;

/// A validated export submission
#[derive(Clone, Debug)]
pub struct ExportRequest {
    /// Meter whose readings are exported
    pub meter_id: String,
    /// Output format
    pub format: ExportFormat,
    /// Whether to gzip the artifact
    pub compressed: bool,
    /// Export time window
    pub filters: ReadingFilters,
}

/// An open artifact ready to be streamed to the caller
pub struct Download {
    /// Artifact file name
    pub file_name: String,
    /// MIME type for the response
    pub content_type: &'static str,
    /// Artifact size in bytes
    pub file_size_bytes: i64,
    /// Artifact content
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("file_size_bytes", &self.file_size_bytes)
            .finish_non_exhaustive()
    }
}

/// Asynchronous export-job pipeline
///
/// Create one per process, share it behind an [`Arc`], and call
/// [`shutdown`](Self::shutdown) before dropping it so in-flight jobs can
/// drain.
pub struct ExportService {
    config: Config,
    store: Arc<JobStore>,
    queue: Arc<dyn TaskQueue>,
    sink: Arc<FilesystemSink>,
    events: broadcast::Sender<Event>,
    pool: Mutex<Option<WorkerPool>>,
    shutting_down: AtomicBool,
}

impl ExportService {
    /// Start the pipeline with the synthetic reading source
    ///
    /// Opens the job database, creates the in-process queue and filesystem
    /// sink, and spawns the worker pool.
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_source(config, Arc::new(SyntheticReadingSource::new(1))).await
    }

    /// Start the pipeline against a caller-supplied reading source
    pub async fn with_source(config: Config, source: Arc<dyn ReadingSource>) -> Result<Self> {
        let store = Arc::new(JobStore::new(&config.persistence.database_path).await?);
        let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryQueue::new());
        let sink = Arc::new(FilesystemSink::new(&config.persistence.export_dir));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            queue: queue.clone(),
            source,
            sink: sink.clone(),
            events: events.clone(),
            config: config.worker.clone(),
        });
        let pool = WorkerPool::spawn(ctx);

        tracing::info!(
            database = %config.persistence.database_path.display(),
            export_dir = %config.persistence.export_dir.display(),
            "Export service started"
        );

        Ok(Self {
            config,
            store,
            queue,
            sink,
            events,
            pool: Mutex::new(Some(pool)),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Submit an export job
    ///
    /// Validates the request, persists a PENDING record, enqueues it for
    /// the workers and returns the initial status. The returned job id is
    /// the handle for all later status and download calls.
    pub async fn submit(&self, request: ExportRequest) -> Result<JobStatus> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if request.meter_id.trim().is_empty() {
            return Err(Error::Validation("meter_id must not be empty".to_string()));
        }
        request.filters.validate()?;

        let job = NewJob {
            id: JobId::generate(),
            meter_id: request.meter_id,
            format: request.format,
            compressed: request.compressed,
            filters: request.filters,
        };
        self.store.insert(&job).await?;
        self.queue.enqueue(job.id).await?;

        tracing::info!(
            job_id = %job.id,
            meter_id = %job.meter_id,
            format = %job.format,
            compressed = job.compressed,
            "Export job queued"
        );
        let _ = self.events.send(Event::Queued {
            id: job.id,
            meter_id: job.meter_id,
        });

        // A worker may already have claimed the job; the submission response
        // is always the initial PENDING view
        Ok(JobStatus {
            job_id: job.id,
            state: JobState::Pending,
            message: JobState::Pending.message().to_string(),
            progress: 0,
            artifact: None,
            error: None,
        })
    }

    /// Current status of a job
    pub async fn get_status(&self, id: JobId) -> Result<JobStatus> {
        self.status_of(id).await
    }

    async fn status_of(&self, id: JobId) -> Result<JobStatus> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(JobStatus::from(record))
    }

    /// Open the artifact of a COMPLETED job for streaming
    ///
    /// Fails with [`Error::NotReady`] while the job is still pending,
    /// running, or has failed.
    pub async fn get_download(&self, id: JobId) -> Result<Download> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let (result_ref, size) = match (record.state, &record.result_ref) {
            (JobState::Completed, Some(result_ref)) => {
                (result_ref.clone(), record.file_size_bytes.unwrap_or(0))
            }
            _ => {
                return Err(Error::NotReady {
                    id: id.to_string(),
                    state: record.state.to_string(),
                });
            }
        };

        let content_type = if record.compressed {
            "application/gzip"
        } else {
            record.format.content_type()
        };
        let reader = self.sink.open(&result_ref).await?;

        Ok(Download {
            file_name: result_ref,
            content_type,
            file_size_bytes: size,
            reader,
        })
    }

    /// Page through a meter's export history, newest first
    ///
    /// `limit` defaults to 50 and is capped at 200; `offset` skips past
    /// newer entries.
    pub async fn list_history(
        &self,
        meter_id: &str,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<HistoryPage> {
        if meter_id.trim().is_empty() {
            return Err(Error::Validation("meter_id must not be empty".to_string()));
        }
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.max(0);

        let total = self.store.count_history(meter_id).await?;
        let jobs = self
            .store
            .query_history(meter_id, limit as usize, offset as usize)
            .await?;

        Ok(HistoryPage {
            meter_id: meter_id.to_string(),
            total,
            jobs,
        })
    }

    /// Subscribe to lifecycle events
    ///
    /// Events are advisory; the job record remains the authoritative view.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Graceful shutdown: stop intake, drain workers, close the store
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Export service shutting down");
        let _ = self.events.send(Event::Shutdown);

        self.queue.close().await;
        if let Some(pool) = self.pool.lock().await.take() {
            pool.shutdown(self.config.shutdown_grace()).await;
        }
        self.store.close().await;
        tracing::info!("Export service stopped");
    }
}

#[cfg(test)]
mod tests;
