//! JSON serializer — one array of reading objects.

use serde::Serialize;

use crate::types::{Reading, round_to};
use crate::Result;

/// One object per reading, field order fixed by this struct
#[derive(Serialize)]
struct ReadingObject<'a> {
    timestamp: String,
    smart_meter_id: &'a str,
    energy_kwh: f64,
    power_kw: f64,
    voltage_v: f64,
    current_a: f64,
}

impl<'a> From<&'a Reading> for ReadingObject<'a> {
    fn from(reading: &'a Reading) -> Self {
        Self {
            timestamp: reading.timestamp_str(),
            smart_meter_id: &reading.meter_id,
            energy_kwh: round_to(reading.energy_kwh, 3),
            power_kw: round_to(reading.power_kw, 3),
            voltage_v: round_to(reading.voltage_v, 1),
            current_a: round_to(reading.current_a, 2),
        }
    }
}

/// JSON output: a bare array of reading objects, streamed element by element
pub struct JsonSerializer {
    wrote_first: bool,
}

impl JsonSerializer {
    /// Create a JSON serializer
    pub fn new() -> Self {
        Self { wrote_first: false }
    }
}

impl Default for JsonSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl super::RowSerializer for JsonSerializer {
    fn begin(&mut self) -> Result<Vec<u8>> {
        Ok(b"[".to_vec())
    }

    fn write_row(&mut self, reading: &Reading) -> Result<Vec<u8>> {
        let mut chunk = if self.wrote_first {
            b",\n  ".to_vec()
        } else {
            b"\n  ".to_vec()
        };
        self.wrote_first = true;

        let object = ReadingObject::from(reading);
        chunk.extend(serde_json::to_vec(&object)?);
        Ok(chunk)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        if self.wrote_first {
            Ok(b"\n]".to_vec())
        } else {
            Ok(b"]".to_vec())
        }
    }
}
