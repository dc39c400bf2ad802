//! Export workers — the consumers driving jobs from PENDING to a terminal
//! state.
//!
//! Each worker loops on the shared task queue, claims the delivered job via
//! the store's compare-and-set, and streams extractor output through the
//! serializer into the artifact sink. Duplicate deliveries lose the claim
//! and are acked without effect, so the pipeline stays correct on an
//! at-least-once queue.

use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Error;
use crate::extract::ReadingSource;
use crate::queue::{Delivery, TaskQueue};
use crate::serialize::{GzipEncoder, serializer_for};
use crate::sink::{ArtifactSink, ArtifactWriter, artifact_file_name};
use crate::store::{JobStore, TransitionFields};
use crate::types::{Event, JobError, JobRecord, JobState};
use crate::Result;

/// Shared dependencies handed to every worker
pub(crate) struct WorkerContext {
    pub(crate) store: Arc<JobStore>,
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) source: Arc<dyn ReadingSource>,
    pub(crate) sink: Arc<dyn ArtifactSink>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) config: WorkerConfig,
}

/// Handle over the spawned worker tasks
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `config.worker_count` worker loops sharing the context
    pub(crate) fn spawn(ctx: Arc<WorkerContext>) -> Self {
        let cancel = CancellationToken::new();
        let count = ctx.config.worker_count.max(1);

        let handles = (0..count)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(worker_id, ctx, cancel))
            })
            .collect();

        tracing::info!(worker_count = count, "Worker pool started");
        Self { handles, cancel }
    }

    /// Wait for the loops to drain, cancelling any still running after the
    /// grace period
    ///
    /// The queue must be closed first so blocked dequeuers wake up.
    pub(crate) async fn shutdown(self, grace: std::time::Duration) {
        let mut drain = futures::future::join_all(self.handles);
        if tokio::time::timeout(grace, &mut drain).await.is_err() {
            tracing::warn!("Shutdown grace period expired, cancelling workers");
            self.cancel.cancel();
            let _ = drain.await;
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    tracing::debug!(worker_id, "Worker started");
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = ctx.queue.dequeue() => match delivery {
                Some(delivery) => delivery,
                // Queue closed and drained
                None => break,
            },
        };
        // Cancellation after the grace period abandons the job mid-flight;
        // it stays RUNNING in the store, which is acceptable because jobs
        // are not resumed across restarts.
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = handle_delivery(worker_id, &ctx, delivery) => {}
        }
    }
    tracing::debug!(worker_id, "Worker stopped");
}

async fn handle_delivery(worker_id: usize, ctx: &WorkerContext, delivery: Delivery) {
    let id = delivery.job_id;

    // Claim ownership. The CAS is the only defense against duplicate
    // deliveries, so every outcome here must be handled explicitly.
    match ctx
        .store
        .transition(
            id,
            JobState::Pending,
            JobState::Running,
            TransitionFields::started(Utc::now()),
        )
        .await
    {
        Ok(()) => {}
        Err(Error::Conflict { .. }) => {
            tracing::debug!(
                worker_id,
                job_id = %id,
                attempt = delivery.attempt,
                "Duplicate delivery, job already claimed"
            );
            ctx.queue.ack(delivery).await;
            return;
        }
        Err(Error::NotFound(_)) => {
            // The record may not be visible yet; back off and redeliver
            tokio::time::sleep(ctx.config.requeue_backoff()).await;
            ctx.queue.nack(delivery).await;
            return;
        }
        Err(e) => {
            tracing::warn!(worker_id, job_id = %id, error = %e, "Claim failed, requeueing");
            tokio::time::sleep(ctx.config.requeue_backoff()).await;
            ctx.queue.nack(delivery).await;
            return;
        }
    }

    let _ = ctx.events.send(Event::Started { id });
    if let Err(e) = ctx.store.update_progress(id, 10).await {
        tracing::warn!(job_id = %id, error = %e, "Progress write failed");
    }

    let record = match ctx.store.get(id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            finalize_failure(
                ctx,
                delivery,
                &Error::NotFound(id.to_string()),
            )
            .await;
            return;
        }
        Err(e) => {
            finalize_failure(ctx, delivery, &e).await;
            return;
        }
    };

    tracing::info!(
        worker_id,
        job_id = %id,
        meter_id = %record.meter_id,
        format = %record.format,
        compressed = record.compressed,
        "Export started"
    );

    let outcome = match tokio::time::timeout(ctx.config.job_timeout(), run_export(ctx, &record))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(ctx.config.job_timeout_secs)),
    };

    match outcome {
        Ok(artifact) => finalize_success(ctx, delivery, artifact).await,
        Err(e) => finalize_failure(ctx, delivery, &e).await,
    }
}

/// Finished export: artifact ref, row count and byte size
struct ExportArtifact {
    result_ref: String,
    record_count: i64,
    file_size_bytes: i64,
}

/// Serializer output routed through optional gzip into the sink
struct ArtifactPipe {
    writer: Box<dyn ArtifactWriter>,
    gzip: Option<GzipEncoder>,
}

impl ArtifactPipe {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        match self.gzip.as_mut() {
            Some(gz) => {
                let compressed = gz.compress(chunk)?;
                if !compressed.is_empty() {
                    self.writer.write_chunk(&compressed).await?;
                }
            }
            None => self.writer.write_chunk(chunk).await?,
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<(String, i64)> {
        if let Some(gz) = self.gzip.take() {
            let tail = gz.finish()?;
            if !tail.is_empty() {
                self.writer.write_chunk(&tail).await?;
            }
        }
        self.writer.finish().await
    }
}

/// Extraction progress scaled into the 10–90 band the status API exposes
fn scaled_progress(rows: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    let pct = 10 + (rows.min(total) * 80 / total) as u8;
    Some(pct.min(90))
}

async fn run_export(ctx: &WorkerContext, record: &JobRecord) -> Result<ExportArtifact> {
    // Row-count hint is progress-only; a failing hint never fails the job
    let count_hint = ctx
        .source
        .count(&record.meter_id, &record.filters)
        .await
        .ok()
        .flatten();

    let mut stream = ctx.source.extract(&record.meter_id, &record.filters).await?;
    let mut serializer = serializer_for(record.format);

    let file_name = artifact_file_name(
        &record.meter_id,
        &record.filters,
        record.format,
        record.compressed,
    );
    let mut pipe = ArtifactPipe {
        writer: ctx.sink.create(&file_name).await?,
        gzip: record.compressed.then(GzipEncoder::new),
    };

    pipe.write(&serializer.begin()?).await?;

    let interval = ctx.config.progress_interval_rows;
    let mut rows: u64 = 0;
    while let Some(item) = stream.next().await {
        let reading = item?;
        pipe.write(&serializer.write_row(&reading)?).await?;
        rows += 1;

        if interval > 0 && rows % interval == 0 {
            if let Some(percent) = scaled_progress(rows, count_hint) {
                if let Err(e) = ctx.store.update_progress(record.id, percent).await {
                    tracing::warn!(job_id = %record.id, error = %e, "Progress write failed");
                }
                let _ = ctx.events.send(Event::Progress {
                    id: record.id,
                    percent,
                });
            }
        }
    }

    pipe.write(&serializer.finish()?).await?;
    let (result_ref, file_size_bytes) = pipe.finish().await?;

    Ok(ExportArtifact {
        result_ref,
        record_count: rows as i64,
        file_size_bytes,
    })
}

async fn finalize_success(ctx: &WorkerContext, delivery: Delivery, artifact: ExportArtifact) {
    let id = delivery.job_id;
    let fields = TransitionFields::completed(
        Utc::now(),
        artifact.result_ref.clone(),
        artifact.record_count,
        artifact.file_size_bytes,
    );

    match ctx
        .store
        .transition(id, JobState::Running, JobState::Completed, fields)
        .await
    {
        Ok(()) => {
            tracing::info!(
                job_id = %id,
                result_ref = %artifact.result_ref,
                record_count = artifact.record_count,
                file_size_bytes = artifact.file_size_bytes,
                "Export completed"
            );
            let _ = ctx.events.send(Event::Completed {
                id,
                result_ref: artifact.result_ref,
                record_count: artifact.record_count,
            });
            ctx.queue.ack(delivery).await;
        }
        Err(Error::Conflict { .. }) => {
            // Already terminal; nothing left to record
            ctx.queue.ack(delivery).await;
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Completion transition failed, requeueing");
            ctx.queue.nack(delivery).await;
        }
    }
}

async fn finalize_failure(ctx: &WorkerContext, delivery: Delivery, err: &Error) {
    let id = delivery.job_id;
    let code = err.job_error_code();
    let message = err.to_string();

    match ctx
        .store
        .transition(
            id,
            JobState::Running,
            JobState::Failed,
            TransitionFields::failed(
                Utc::now(),
                JobError {
                    code: code.to_string(),
                    message: message.clone(),
                },
            ),
        )
        .await
    {
        Ok(()) => {
            tracing::error!(job_id = %id, code, error = %message, "Export failed");
            let _ = ctx.events.send(Event::Failed {
                id,
                code: code.to_string(),
                error: message,
            });
            ctx.queue.ack(delivery).await;
        }
        Err(Error::Conflict { .. }) => {
            ctx.queue.ack(delivery).await;
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failure transition failed, requeueing");
            ctx.queue.nack(delivery).await;
        }
    }
}
