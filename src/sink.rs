//! Artifact sink — chunked artifact writing and retrieval.
//!
//! The worker streams serializer output into an [`ArtifactWriter`] and, on
//! success, stores the returned `result_ref` on the job record. The ref is
//! opaque to everything but the sink that issued it; for the filesystem sink
//! it is the artifact's file name under the export directory.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};

use crate::error::Error;
use crate::types::{ExportFormat, ReadingFilters};
use crate::Result;

/// Build the artifact file name for an export
///
/// `smart_meter_<meter>_<YYYYMMDD>_<YYYYMMDD>.<ext>`, with a `.gz` suffix
/// when the artifact is compressed.
pub fn artifact_file_name(
    meter_id: &str,
    filters: &ReadingFilters,
    format: ExportFormat,
    compressed: bool,
) -> String {
    let mut name = format!(
        "smart_meter_{}_{}_{}.{}",
        meter_id,
        filters.start.format("%Y%m%d"),
        filters.end.format("%Y%m%d"),
        format.file_extension(),
    );
    if compressed {
        name.push_str(".gz");
    }
    name
}

/// In-progress artifact write
#[async_trait]
pub trait ArtifactWriter: Send {
    /// Append one chunk
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flush and close, returning the artifact ref and its size in bytes
    async fn finish(self: Box<Self>) -> Result<(String, i64)>;
}

/// Artifact storage abstraction
///
/// Artifacts are write-once: a writer that is dropped without `finish`
/// leaves no usable ref behind, and nothing ever rewrites a finished
/// artifact under the same ref.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Start writing a new artifact under the given file name
    async fn create(&self, file_name: &str) -> Result<Box<dyn ArtifactWriter>>;

    /// Open a finished artifact for reading
    async fn open(&self, result_ref: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Sink writing artifacts as files under a configured export directory
pub struct FilesystemSink {
    export_dir: PathBuf,
}

impl FilesystemSink {
    /// Create a sink rooted at `export_dir` (created on first write)
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    /// Refs are bare file names; anything resembling a path is rejected
    fn checked_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(Error::Validation(format!(
                "invalid artifact reference '{name}'"
            )));
        }
        Ok(self.export_dir.join(name))
    }
}

struct FilesystemWriter {
    writer: BufWriter<File>,
    result_ref: String,
    bytes_written: i64,
}

#[async_trait]
impl ArtifactWriter for FilesystemWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.writer.write_all(chunk).await?;
        self.bytes_written += chunk.len() as i64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(String, i64)> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        Ok((self.result_ref, self.bytes_written))
    }
}

#[async_trait]
impl ArtifactSink for FilesystemSink {
    async fn create(&self, file_name: &str) -> Result<Box<dyn ArtifactWriter>> {
        let path = self.checked_path(file_name)?;
        tokio::fs::create_dir_all(&self.export_dir).await?;
        let file = File::create(&path).await?;
        tracing::debug!(path = %path.display(), "Artifact file created");
        Ok(Box::new(FilesystemWriter {
            writer: BufWriter::new(file),
            result_ref: file_name.to_string(),
            bytes_written: 0,
        }))
    }

    async fn open(&self, result_ref: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let path = self.checked_path(result_ref)?;
        let file = File::open(&path).await?;
        Ok(Box::new(file))
    }
}
