//! Reading extraction — lazy, ordered row streams from the data store.
//!
//! The extractor hands the worker a single-pass stream of readings in
//! ascending timestamp order. Streams may be arbitrarily large and are
//! never materialized wholesale; the SQLite source pages through the
//! readings table with keyset pagination, the synthetic source generates
//! rows on demand.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;

use crate::error::Error;
use crate::types::{Reading, ReadingFilters, round_to};
use crate::Result;

/// Lazy, ordered, single-pass sequence of readings
pub type ReadingStream = BoxStream<'static, Result<Reading>>;

/// Source of meter readings for export jobs
///
/// Implementations bind the pipeline to a concrete data store. Extraction
/// failures surface as [`Error::DataUnavailable`] and are terminal for the
/// job being exported.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Stream readings for a meter within the filter window, ascending by
    /// timestamp
    async fn extract(&self, meter_id: &str, filters: &ReadingFilters) -> Result<ReadingStream>;

    /// Optional row-count hint for the same window
    ///
    /// Used only to scale progress reporting; `None` means no estimate is
    /// available and progress stays coarse.
    async fn count(&self, meter_id: &str, filters: &ReadingFilters) -> Result<Option<u64>>;
}

/// Rows fetched per page when streaming from SQLite
const FETCH_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, FromRow)]
struct ReadingRow {
    timestamp: i64,
    meter_id: String,
    energy_kwh: f64,
    power_kw: f64,
    voltage_v: f64,
    current_a: f64,
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            timestamp: Utc
                .timestamp_opt(row.timestamp, 0)
                .single()
                .unwrap_or_else(Utc::now),
            meter_id: row.meter_id,
            energy_kwh: row.energy_kwh,
            power_kw: row.power_kw,
            voltage_v: row.voltage_v,
            current_a: row.current_a,
        }
    }
}

/// Reading source backed by a `meter_readings` SQLite table
///
/// Pages through the table with keyset pagination so memory stays bounded
/// regardless of window size.
#[derive(Clone)]
pub struct SqliteReadingSource {
    pool: SqlitePool,
}

impl SqliteReadingSource {
    /// Wrap an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `meter_readings` table if it does not exist
    ///
    /// Intended for embedded deployments and test fixtures; production
    /// schemas are owned by the data-store side.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meter_readings (
                meter_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                energy_kwh REAL NOT NULL,
                power_kw REAL NOT NULL,
                voltage_v REAL NOT NULL,
                current_a REAL NOT NULL,
                PRIMARY KEY (meter_id, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DataUnavailable(format!("failed to create readings table: {e}")))?;
        Ok(())
    }

    /// Insert one reading (test/demo fixture helper)
    pub async fn insert(&self, reading: &Reading) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meter_readings (
                meter_id, timestamp, energy_kwh, power_kw, voltage_v, current_a
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&reading.meter_id)
        .bind(reading.timestamp.timestamp())
        .bind(reading.energy_kwh)
        .bind(reading.power_kw)
        .bind(reading.voltage_v)
        .bind(reading.current_a)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DataUnavailable(format!("failed to insert reading: {e}")))?;
        Ok(())
    }

    async fn fetch_page(
        pool: &SqlitePool,
        meter_id: &str,
        after: i64,
        end: i64,
    ) -> Result<Vec<ReadingRow>> {
        sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT timestamp, meter_id, energy_kwh, power_kw, voltage_v, current_a
            FROM meter_readings
            WHERE meter_id = ? AND timestamp > ? AND timestamp <= ?
            ORDER BY timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(meter_id)
        .bind(after)
        .bind(end)
        .bind(FETCH_PAGE_SIZE)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::DataUnavailable(format!("reading store query failed: {e}")))
    }
}

#[async_trait]
impl ReadingSource for SqliteReadingSource {
    async fn extract(&self, meter_id: &str, filters: &ReadingFilters) -> Result<ReadingStream> {
        struct PageState {
            pool: SqlitePool,
            meter_id: String,
            cursor: i64,
            end: i64,
            buffer: std::collections::VecDeque<ReadingRow>,
            exhausted: bool,
        }

        let state = PageState {
            pool: self.pool.clone(),
            meter_id: meter_id.to_string(),
            // > cursor keeps pagination keyset-based; start - 1 makes the
            // window start inclusive
            cursor: filters.start.timestamp() - 1,
            end: filters.end.timestamp(),
            buffer: std::collections::VecDeque::new(),
            exhausted: false,
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(row) = state.buffer.pop_front() {
                    state.cursor = row.timestamp;
                    return Some((Ok(Reading::from(row)), state));
                }
                if state.exhausted {
                    return None;
                }
                match Self::fetch_page(&state.pool, &state.meter_id, state.cursor, state.end).await
                {
                    Ok(rows) => {
                        if (rows.len() as i64) < FETCH_PAGE_SIZE {
                            state.exhausted = true;
                        }
                        if rows.is_empty() {
                            return None;
                        }
                        state.buffer.extend(rows);
                    }
                    Err(e) => {
                        state.exhausted = true;
                        return Some((Err(e), state));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn count(&self, meter_id: &str, filters: &ReadingFilters) -> Result<Option<u64>> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM meter_readings WHERE meter_id = ? AND timestamp >= ? AND timestamp <= ?",
        )
        .bind(meter_id)
        .bind(filters.start.timestamp())
        .bind(filters.end.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::DataUnavailable(format!("reading store count failed: {e}")))?;

        Ok(Some(count.max(0) as u64))
    }
}

/// Deterministic synthetic reading generator
///
/// Models a household load shape (morning/evening peaks, quiet nights)
/// around a 230 V / 2 kW baseline. Useful for demos and tests where no real
/// reading store is wired in. Rejects meter ids that don't resolve (empty,
/// or not starting with a digit) the way the backing registry would.
#[derive(Clone, Debug)]
pub struct SyntheticReadingSource {
    interval_minutes: u32,
}

const BASE_VOLTAGE: f64 = 230.0;
const BASE_POWER_KW: f64 = 2.0;

impl SyntheticReadingSource {
    /// Create a generator emitting one reading per `interval_minutes`
    pub fn new(interval_minutes: u32) -> Self {
        Self {
            interval_minutes: interval_minutes.max(1),
        }
    }

    fn validate_meter(meter_id: &str) -> Result<()> {
        let known = meter_id
            .chars()
            .next()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false);
        if known {
            Ok(())
        } else {
            Err(Error::DataUnavailable(format!(
                "smart meter '{meter_id}' not found"
            )))
        }
    }

    /// Deterministic per-timestamp wobble in [-1.0, 1.0)
    fn wobble(timestamp: DateTime<Utc>, salt: u64) -> f64 {
        let mut x = (timestamp.timestamp() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ salt;
        x ^= x >> 33;
        x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
        x ^= x >> 33;
        ((x % 2000) as f64 / 1000.0) - 1.0
    }

    fn reading_at(&self, meter_id: &str, timestamp: DateTime<Utc>) -> Reading {
        let hour = timestamp.hour();
        // Morning and evening peaks, quiet nights
        let power_multiplier = if (6..=9).contains(&hour) || (17..=22).contains(&hour) {
            2.0 + 0.5 * Self::wobble(timestamp, 1)
        } else if hour >= 23 || hour <= 5 {
            0.55 + 0.25 * Self::wobble(timestamp, 2)
        } else {
            1.15 + 0.35 * Self::wobble(timestamp, 3)
        };

        let power_kw = BASE_POWER_KW * power_multiplier + 0.2 * Self::wobble(timestamp, 4);
        let voltage_v = BASE_VOLTAGE + 5.0 * Self::wobble(timestamp, 5);
        let current_a = (power_kw * 1000.0) / voltage_v;
        let energy_kwh = (power_kw * self.interval_minutes as f64) / 60.0;

        Reading {
            timestamp,
            meter_id: meter_id.to_string(),
            energy_kwh: round_to(energy_kwh, 3),
            power_kw: round_to(power_kw, 3),
            voltage_v: round_to(voltage_v, 1),
            current_a: round_to(current_a, 2),
        }
    }
}

impl Default for SyntheticReadingSource {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ReadingSource for SyntheticReadingSource {
    async fn extract(&self, meter_id: &str, filters: &ReadingFilters) -> Result<ReadingStream> {
        Self::validate_meter(meter_id)?;

        let source = self.clone();
        let meter = meter_id.to_string();
        let end = filters.end;
        let step = chrono::Duration::minutes(self.interval_minutes as i64);

        let stream = stream::unfold(Some(filters.start), move |current| {
            let source = source.clone();
            let meter = meter.clone();
            async move {
                let ts = current?;
                if ts > end {
                    return None;
                }
                let reading = source.reading_at(&meter, ts);
                Some((Ok(reading), ts.checked_add_signed(step)))
            }
        });

        Ok(stream.boxed())
    }

    async fn count(&self, meter_id: &str, filters: &ReadingFilters) -> Result<Option<u64>> {
        Self::validate_meter(meter_id)?;
        let span_minutes = (filters.end - filters.start).num_minutes();
        if span_minutes < 0 {
            return Ok(Some(0));
        }
        Ok(Some((span_minutes as u64 / self.interval_minutes as u64) + 1))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn window(start: &str, end: &str) -> ReadingFilters {
        ReadingFilters::new(ts(start), ts(end))
    }

    async fn memory_source() -> SqliteReadingSource {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let source = SqliteReadingSource::new(pool);
        source.ensure_schema().await.unwrap();
        source
    }

    fn reading(meter: &str, timestamp: &str, power_kw: f64) -> Reading {
        Reading {
            timestamp: ts(timestamp),
            meter_id: meter.to_string(),
            energy_kwh: power_kw / 60.0,
            power_kw,
            voltage_v: 230.0,
            current_a: power_kw * 1000.0 / 230.0,
        }
    }

    #[tokio::test]
    async fn sqlite_source_streams_rows_in_timestamp_order() {
        let source = memory_source().await;
        // Insert out of order; the stream must come back sorted
        for t in ["2025-07-01T00:02:00Z", "2025-07-01T00:00:00Z", "2025-07-01T00:01:00Z"] {
            source.insert(&reading("123", t, 2.0)).await.unwrap();
        }

        let filters = window("2025-07-01T00:00:00Z", "2025-07-01T01:00:00Z");
        let rows: Vec<Reading> = source
            .extract("123", &filters)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn sqlite_source_window_bounds_are_inclusive() {
        let source = memory_source().await;
        source
            .insert(&reading("123", "2025-07-01T00:00:00Z", 2.0))
            .await
            .unwrap();
        source
            .insert(&reading("123", "2025-07-01T01:00:00Z", 2.0))
            .await
            .unwrap();
        source
            .insert(&reading("123", "2025-07-01T02:00:00Z", 2.0))
            .await
            .unwrap();

        let filters = window("2025-07-01T00:00:00Z", "2025-07-01T01:00:00Z");
        let rows: Vec<Reading> = source
            .extract("123", &filters)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 2, "both window edges are inclusive");

        assert_eq!(source.count("123", &filters).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn sqlite_source_scopes_rows_to_the_requested_meter() {
        let source = memory_source().await;
        source
            .insert(&reading("123", "2025-07-01T00:00:00Z", 2.0))
            .await
            .unwrap();
        source
            .insert(&reading("456", "2025-07-01T00:00:00Z", 3.0))
            .await
            .unwrap();

        let filters = window("2025-07-01T00:00:00Z", "2025-07-01T01:00:00Z");
        let rows: Vec<Reading> = source
            .extract("123", &filters)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].meter_id, "123");
    }

    #[tokio::test]
    async fn sqlite_source_empty_window_yields_zero_rows() {
        let source = memory_source().await;
        let filters = window("2025-07-01T00:00:00Z", "2025-07-01T01:00:00Z");
        let rows: Vec<Reading> = source
            .extract("999", &filters)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(source.count("999", &filters).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn synthetic_source_counts_match_streamed_rows() {
        let source = SyntheticReadingSource::new(1);
        let filters = window("2025-07-01T00:00:00Z", "2025-07-01T00:10:00Z");

        let rows: Vec<Reading> = source
            .extract("123", &filters)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 11, "inclusive window at 1-minute interval");
        assert_eq!(source.count("123", &filters).await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn synthetic_source_is_deterministic() {
        let source = SyntheticReadingSource::new(1);
        let filters = window("2025-07-01T00:00:00Z", "2025-07-01T00:05:00Z");

        let first: Vec<Reading> = source
            .extract("123", &filters)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let second: Vec<Reading> = source
            .extract("123", &filters)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn synthetic_source_rejects_unknown_meter_ids() {
        let source = SyntheticReadingSource::new(1);
        let filters = window("2025-07-01T00:00:00Z", "2025-07-01T01:00:00Z");

        for bad in ["", "meter-1", "x123"] {
            let err = source.extract(bad, &filters).await.err().unwrap();
            assert!(
                matches!(err, Error::DataUnavailable(_)),
                "meter id {bad:?} must be rejected, got {err:?}"
            );
            assert!(err.to_string().contains("not found"));
        }
    }

    #[tokio::test]
    async fn synthetic_readings_stay_in_plausible_ranges() {
        let source = SyntheticReadingSource::new(1);
        let filters = window("2025-07-01T00:00:00Z", "2025-07-02T00:00:00Z");

        let rows: Vec<Reading> = source
            .extract("123", &filters)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        for row in &rows {
            assert!(row.voltage_v > 220.0 && row.voltage_v < 240.0);
            assert!(row.power_kw > -1.0 && row.power_kw < 8.0);
            assert!((row.current_a - row.power_kw * 1000.0 / row.voltage_v).abs() < 0.1);
        }
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
