//! Export serializers — incremental CSV, JSON and XML writers plus gzip.
//!
//! Serializers are chunk producers: `begin` emits the document prologue,
//! `write_row` one encoded row, `finish` the epilogue. The worker forwards
//! chunks straight to the artifact sink (optionally through [`GzipEncoder`]),
//! so the full document never lives in memory.

mod csv;
mod json;
mod xml;

pub use csv::CsvSerializer;
pub use json::JsonSerializer;
pub use xml::XmlSerializer;

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;

use crate::error::Error;
use crate::types::{ExportFormat, Reading};
use crate::Result;

/// Incremental row-oriented serializer
///
/// Call order is `begin`, zero or more `write_row`, `finish`. Each call
/// returns the bytes to append to the output; a zero-row document is
/// `begin` directly followed by `finish` and must still be well-formed.
pub trait RowSerializer: Send {
    /// Document prologue (header row, opening bracket, XML declaration)
    fn begin(&mut self) -> Result<Vec<u8>>;

    /// One encoded reading
    fn write_row(&mut self, reading: &Reading) -> Result<Vec<u8>>;

    /// Document epilogue
    fn finish(&mut self) -> Result<Vec<u8>>;
}

/// Construct the serializer for a format
pub fn serializer_for(format: ExportFormat) -> Box<dyn RowSerializer> {
    match format {
        ExportFormat::Csv => Box::new(CsvSerializer::new()),
        ExportFormat::Json => Box::new(JsonSerializer::new()),
        ExportFormat::Xml => Box::new(XmlSerializer::new()),
    }
}

/// Streaming gzip wrapper over serializer output
///
/// Feeds chunks through a [`GzEncoder`] and drains whatever compressed
/// bytes are ready, keeping memory bounded for large exports.
pub struct GzipEncoder {
    encoder: GzEncoder<Vec<u8>>,
}

impl GzipEncoder {
    /// Create an encoder at the default compression level
    pub fn new() -> Self {
        Self {
            encoder: GzEncoder::new(Vec::new(), Compression::default()),
        }
    }

    /// Compress a chunk and return whatever output is ready
    ///
    /// May return an empty vec while the encoder buffers input.
    pub fn compress(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.encoder
            .write_all(chunk)
            .map_err(|e| Error::Serialization(format!("gzip write failed: {e}")))?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    /// Flush the encoder and return the final compressed bytes
    pub fn finish(self) -> Result<Vec<u8>> {
        self.encoder
            .finish()
            .map_err(|e| Error::Serialization(format!("gzip finish failed: {e}")))
    }
}

impl Default for GzipEncoder {
    fn default() -> Self {
        Self::new()
    }
}
