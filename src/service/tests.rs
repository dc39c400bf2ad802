// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::config::WorkerConfig;
use crate::error::codes;
use crate::extract::ReadingStream;
use crate::types::Reading;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn window() -> ReadingFilters {
    ReadingFilters::new(ts("2025-07-01T00:00:00Z"), ts("2025-07-01T00:10:00Z"))
}

fn request(meter: &str, format: ExportFormat, compressed: bool) -> ExportRequest {
    ExportRequest {
        meter_id: meter.to_string(),
        format,
        compressed,
        filters: window(),
    }
}

struct TestEnv {
    service: ExportService,
    _dir: TempDir,
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.path().join("jobs.db");
    config.persistence.export_dir = dir.path().join("exports");
    config.worker = WorkerConfig {
        job_timeout_secs: 5,
        requeue_backoff_ms: 20,
        ..Default::default()
    };
    config.shutdown_grace_secs = 1;
    config
}

async fn env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let service = ExportService::new(test_config(&dir)).await.unwrap();
    TestEnv { service, _dir: dir }
}

async fn env_with(source: Arc<dyn ReadingSource>) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let service = ExportService::with_source(test_config(&dir), source)
        .await
        .unwrap();
    TestEnv { service, _dir: dir }
}

async fn wait_terminal(service: &ExportService, id: JobId) -> JobStatus {
    for _ in 0..250 {
        let status = service.get_status(id).await.unwrap();
        if status.state.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} did not reach a terminal state");
}

async fn read_body(download: Download) -> Vec<u8> {
    let mut reader = download.reader;
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await.unwrap();
    body
}

/// Source whose stream never yields a row
struct PendingSource;

#[async_trait]
impl ReadingSource for PendingSource {
    async fn extract(&self, _: &str, _: &ReadingFilters) -> crate::Result<ReadingStream> {
        Ok(futures::stream::pending().boxed())
    }

    async fn count(&self, _: &str, _: &ReadingFilters) -> crate::Result<Option<u64>> {
        Ok(None)
    }
}

/// Source that fails partway through extraction
struct FailingSource;

#[async_trait]
impl ReadingSource for FailingSource {
    async fn extract(
        &self,
        meter_id: &str,
        filters: &ReadingFilters,
    ) -> crate::Result<ReadingStream> {
        let row = Reading {
            timestamp: filters.start,
            meter_id: meter_id.to_string(),
            energy_kwh: 0.033,
            power_kw: 2.0,
            voltage_v: 230.0,
            current_a: 8.7,
        };
        let items: Vec<crate::Result<Reading>> = vec![
            Ok(row),
            Err(Error::DataUnavailable(
                "reading store unreachable".to_string(),
            )),
        ];
        Ok(futures::stream::iter(items).boxed())
    }

    async fn count(&self, _: &str, _: &ReadingFilters) -> crate::Result<Option<u64>> {
        Ok(None)
    }
}

/// Source with no rows in any window
struct EmptySource;

#[async_trait]
impl ReadingSource for EmptySource {
    async fn extract(&self, _: &str, _: &ReadingFilters) -> crate::Result<ReadingStream> {
        Ok(futures::stream::empty().boxed())
    }

    async fn count(&self, _: &str, _: &ReadingFilters) -> crate::Result<Option<u64>> {
        Ok(Some(0))
    }
}

#[tokio::test]
async fn submit_poll_download_round_trip() {
    let env = env().await;

    let status = env
        .service
        .submit(request("123", ExportFormat::Csv, false))
        .await
        .unwrap();
    assert_eq!(status.state, JobState::Pending);
    assert_eq!(status.progress, 0);
    assert!(status.artifact.is_none());
    let id = status.job_id;

    let status = wait_terminal(&env.service, id).await;
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.progress, 100);
    assert_eq!(status.message, "Export completed successfully");
    let artifact = status.artifact.unwrap();
    assert_eq!(artifact.record_count, 11, "inclusive 10-minute window");
    assert!(artifact.file_size_bytes > 0);

    let download = env.service.get_download(id).await.unwrap();
    assert_eq!(download.content_type, "text/csv");
    assert_eq!(download.file_name, "smart_meter_123_20250701_20250701.csv");
    assert_eq!(download.file_size_bytes, artifact.file_size_bytes);

    let body = read_body(download).await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.starts_with("timestamp,smart_meter_id,energy_kwh,power_kw,voltage_v,current_a"));
    assert_eq!(text.lines().count(), 12, "header plus 11 rows");

    env.service.shutdown().await;
}

#[tokio::test]
async fn unsupported_format_never_creates_a_job() {
    let env = env().await;

    // Format strings are rejected at parse time, before submission
    let err = "yaml".parse::<ExportFormat>().unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(env.service.list_history("123", None, 0).await.unwrap().total, 0);

    env.service.shutdown().await;
}

#[tokio::test]
async fn invalid_submissions_are_rejected_synchronously() {
    let env = env().await;

    let err = env
        .service
        .submit(request("", ExportFormat::Csv, false))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "empty meter: {err:?}");

    let mut inverted = request("123", ExportFormat::Csv, false);
    inverted.filters = ReadingFilters::new(ts("2025-07-02T00:00:00Z"), ts("2025-07-01T00:00:00Z"));
    let err = env.service.submit(inverted).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "inverted window: {err:?}");

    // Nothing was persisted for either rejection
    assert_eq!(env.service.list_history("123", None, 0).await.unwrap().total, 0);

    env.service.shutdown().await;
}

#[tokio::test]
async fn status_of_unknown_job_is_not_found() {
    let env = env().await;

    let err = env.service.get_status(JobId::generate()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let err = env
        .service
        .get_download(JobId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    env.service.shutdown().await;
}

#[tokio::test]
async fn download_before_completion_is_not_ready() {
    let env = env_with(Arc::new(PendingSource)).await;

    let status = env
        .service
        .submit(request("123", ExportFormat::Csv, false))
        .await
        .unwrap();

    let err = env.service.get_download(status.job_id).await.unwrap_err();
    assert!(matches!(err, Error::NotReady { .. }), "got {err:?}");

    env.service.shutdown().await;
}

#[tokio::test]
async fn failed_job_exposes_error_and_no_artifact() {
    let env = env_with(Arc::new(FailingSource)).await;

    let status = env
        .service
        .submit(request("123", ExportFormat::Csv, false))
        .await
        .unwrap();
    let status = wait_terminal(&env.service, status.job_id).await;

    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.message, "Export failed");
    assert!(status.artifact.is_none());
    let error = status.error.unwrap();
    assert_eq!(error.code, codes::DATA_UNAVAILABLE);
    assert!(!error.message.is_empty());

    let err = env.service.get_download(status.job_id).await.unwrap_err();
    assert!(matches!(err, Error::NotReady { .. }));

    env.service.shutdown().await;
}

#[tokio::test]
async fn zero_row_export_yields_a_well_formed_empty_document() {
    let env = env_with(Arc::new(EmptySource)).await;

    let status = env
        .service
        .submit(request("123", ExportFormat::Json, false))
        .await
        .unwrap();
    let status = wait_terminal(&env.service, status.job_id).await;

    assert_eq!(status.state, JobState::Completed);
    let artifact = status.artifact.unwrap();
    assert_eq!(artifact.record_count, 0);

    let download = env.service.get_download(status.job_id).await.unwrap();
    let body = read_body(download).await;
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, serde_json::json!([]));

    env.service.shutdown().await;
}

#[tokio::test]
async fn compressed_download_reports_gzip_content_type() {
    let env = env().await;

    let status = env
        .service
        .submit(request("123", ExportFormat::Json, true))
        .await
        .unwrap();
    let status = wait_terminal(&env.service, status.job_id).await;
    assert_eq!(status.state, JobState::Completed);

    let download = env.service.get_download(status.job_id).await.unwrap();
    assert_eq!(download.content_type, "application/gzip");
    assert!(download.file_name.ends_with(".json.gz"));

    let body = read_body(download).await;
    assert_eq!(&body[..2], &[0x1f, 0x8b]);

    env.service.shutdown().await;
}

#[tokio::test]
async fn history_is_scoped_paged_and_totaled() {
    let env = env().await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let status = env
            .service
            .submit(request("123", ExportFormat::Csv, false))
            .await
            .unwrap();
        ids.push(status.job_id);
    }
    let other = env
        .service
        .submit(request("456", ExportFormat::Xml, false))
        .await
        .unwrap();

    for id in ids.iter().chain([&other.job_id]) {
        wait_terminal(&env.service, *id).await;
    }

    let page = env.service.list_history("123", Some(2), 0).await.unwrap();
    assert_eq!(page.meter_id, "123");
    assert_eq!(page.total, 3);
    assert_eq!(page.jobs.len(), 2);
    assert!(page.jobs.iter().all(|j| j.meter_id == "123"));
    assert!(
        page.jobs[0].created_at >= page.jobs[1].created_at,
        "history must be newest-first"
    );
    let completed = &page.jobs[0];
    assert_eq!(completed.state, JobState::Completed);
    assert!(completed.artifact.is_some());

    let rest = env.service.list_history("123", Some(2), 2).await.unwrap();
    assert_eq!(rest.jobs.len(), 1);

    let other_page = env.service.list_history("456", None, 0).await.unwrap();
    assert_eq!(other_page.total, 1);

    env.service.shutdown().await;
}

#[tokio::test]
async fn events_track_the_job_lifecycle() {
    let env = env().await;
    let mut events = env.service.subscribe();

    let status = env
        .service
        .submit(request("123", ExportFormat::Csv, false))
        .await
        .unwrap();
    let id = status.job_id;

    let mut saw_queued = false;
    let mut saw_started = false;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("lifecycle events must arrive")
            .unwrap();
        match event {
            Event::Queued { id: event_id, meter_id } => {
                assert_eq!(event_id, id);
                assert_eq!(meter_id, "123");
                saw_queued = true;
            }
            Event::Started { id: event_id } => {
                assert_eq!(event_id, id);
                saw_started = true;
            }
            Event::Completed {
                id: event_id,
                record_count,
                ..
            } => {
                assert_eq!(event_id, id);
                assert_eq!(record_count, 11);
                break;
            }
            Event::Progress { .. } | Event::Failed { .. } | Event::Shutdown => {}
        }
    }
    assert!(saw_queued);
    assert!(saw_started);

    env.service.shutdown().await;
}

#[tokio::test]
async fn submit_after_shutdown_is_rejected() {
    let env = env().await;
    env.service.shutdown().await;

    let err = env
        .service
        .submit(request("123", ExportFormat::Csv, false))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}
