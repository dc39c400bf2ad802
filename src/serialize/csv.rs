//! CSV serializer — header row plus one record per reading.

use crate::error::Error;
use crate::types::Reading;
use crate::Result;

/// CSV output with a fixed header and RFC 4180 quoting
pub struct CsvSerializer;

impl CsvSerializer {
    /// Create a CSV serializer
    pub fn new() -> Self {
        Self
    }

    fn encode_record<I, S>(fields: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(fields)
            .map_err(|e| Error::Serialization(format!("csv encode failed: {e}")))?;
        writer
            .into_inner()
            .map_err(|e| Error::Serialization(format!("csv flush failed: {e}")))
    }
}

impl Default for CsvSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl super::RowSerializer for CsvSerializer {
    fn begin(&mut self) -> Result<Vec<u8>> {
        Self::encode_record(Reading::COLUMNS)
    }

    fn write_row(&mut self, reading: &Reading) -> Result<Vec<u8>> {
        Self::encode_record(reading.field_strings())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::super::tests::{render, sample_readings};
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn csv_document_has_header_and_one_line_per_reading() {
        let doc = render(Box::new(CsvSerializer::new()), &sample_readings());
        let text = String::from_utf8(doc).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "timestamp,smart_meter_id,energy_kwh,power_kw,voltage_v,current_a"
        );
        assert_eq!(lines[1], "2025-07-01T00:00:00Z,123,0.033,1.984,230.1,8.62");
        assert_eq!(lines[3], "2025-07-01T00:02:00Z,123,0.032,1.920,230.4,8.33");
    }

    #[test]
    fn csv_zero_rows_is_just_the_header() {
        let doc = render(Box::new(CsvSerializer::new()), &[]);
        let text = String::from_utf8(doc).unwrap();
        assert_eq!(
            text.trim_end(),
            "timestamp,smart_meter_id,energy_kwh,power_kw,voltage_v,current_a"
        );
    }

    #[test]
    fn csv_quotes_fields_containing_delimiters() {
        let reading = Reading {
            timestamp: "2025-07-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
            meter_id: "1,\"two\"".to_string(),
            energy_kwh: 0.1,
            power_kw: 1.0,
            voltage_v: 230.0,
            current_a: 4.35,
        };

        let doc = render(Box::new(CsvSerializer::new()), &[reading]);
        let text = String::from_utf8(doc).unwrap();
        assert!(
            text.contains("\"1,\"\"two\"\"\""),
            "delimiter and quotes must be escaped, got: {text}"
        );
    }
}
