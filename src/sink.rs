/// Idempotent persistence for normalized weather records.
///
/// Grid records are written with conflict-skip semantics on the natural key
/// `(latitude, longitude, timestamp)`: rows already present are left as they
/// are, so re-running a window is a no-op for data already stored. The
/// single-station sample table is the exception and updates on conflict.
///
/// A batch is written in one transaction. Rows go out in multi-row INSERT
/// statements of at most `MAX_ROWS_PER_STATEMENT` to stay under the
/// protocol's bind-parameter limit; either all of them commit or none do.

use crate::ingest::forecast::SampleReading;
use crate::model::{WeatherRecord, GRID_COLUMNS, GRID_TABLE};
use postgres::types::ToSql;
use postgres::Client;
use thiserror::Error;
use tracing::debug;

/// 1000 rows x 10 columns stays well below the 65535 parameter ceiling.
pub const MAX_ROWS_PER_STATEMENT: usize = 1000;

pub const SAMPLE_TABLE: &str = "weather_samples";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<postgres::Error> for SinkError {
    fn from(e: postgres::Error) -> Self {
        SinkError::Persistence(e.to_string())
    }
}

/// Destination for a window's records.
pub trait RecordSink {
    /// Writes `records`, skipping rows whose key already exists.
    ///
    /// Returns the number of rows attempted, not the number newly inserted.
    fn upsert_batch(&mut self, records: &[WeatherRecord]) -> Result<usize, SinkError>;
}

/// Builds `INSERT ... VALUES ($1..), ($11..) ... ON CONFLICT DO NOTHING`
/// for `rows` grid records.
pub fn build_grid_insert(rows: usize) -> String {
    let width = GRID_COLUMNS.len();
    let tuples: Vec<String> = (0..rows)
        .map(|row| {
            let params: Vec<String> = (1..=width).map(|col| format!("${}", row * width + col)).collect();
            format!("({})", params.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT (latitude, longitude, timestamp) DO NOTHING",
        GRID_TABLE,
        GRID_COLUMNS.join(", "),
        tuples.join(", ")
    )
}

/// Conflict-skip sink over a single PostgreSQL connection.
pub struct PostgresSink {
    client: Client,
}

impl PostgresSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn into_inner(self) -> Client {
        self.client
    }
}

impl RecordSink for PostgresSink {
    fn upsert_batch(&mut self, records: &[WeatherRecord]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.client.transaction()?;
        let mut inserted = 0u64;

        for batch in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = build_grid_insert(batch.len());
            let values: Vec<[Option<f64>; 7]> = batch.iter().map(|r| r.values()).collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(batch.len() * GRID_COLUMNS.len());
            for (record, vals) in batch.iter().zip(&values) {
                params.push(&record.latitude);
                params.push(&record.longitude);
                params.push(&record.timestamp);
                for v in vals {
                    params.push(v);
                }
            }

            inserted += tx.execute(sql.as_str(), &params)?;
        }

        tx.commit()?;
        debug!(attempted = records.len(), inserted, "grid batch committed");
        Ok(records.len())
    }
}

/// Writes station samples, replacing values already stored for a timestamp.
pub fn upsert_samples(client: &mut Client, samples: &[SampleReading]) -> Result<usize, SinkError> {
    if samples.is_empty() {
        return Ok(0);
    }

    let mut tx = client.transaction()?;
    let stmt = tx.prepare(&format!(
        "INSERT INTO {} (timestamp, temperature, humidity, wind_speed)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (timestamp) DO UPDATE SET
             temperature = EXCLUDED.temperature,
             humidity = EXCLUDED.humidity,
             wind_speed = EXCLUDED.wind_speed",
        SAMPLE_TABLE
    ))?;

    for s in samples {
        tx.execute(&stmt, &[&s.timestamp, &s.temperature, &s.humidity, &s.wind_speed])?;
    }

    tx.commit()?;
    Ok(samples.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_row_insert() {
        let sql = build_grid_insert(1);
        assert_eq!(
            sql,
            "INSERT INTO grid_weather_data (latitude, longitude, timestamp, temperature, precipitation, \
             et0_fao_evapotranspiration, soil_moisture_0_to_7cm, relative_humidity_2m, wind_speed_10m, \
             shortwave_radiation) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (latitude, longitude, timestamp) DO NOTHING"
        );
    }

    #[test]
    fn test_placeholders_continue_across_rows() {
        let sql = build_grid_insert(3);
        assert!(sql.contains("($11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"));
        assert!(sql.contains("$30)"));
        assert!(!sql.contains("$31"));
    }

    #[test]
    fn test_full_statement_within_parameter_limit() {
        let sql = build_grid_insert(MAX_ROWS_PER_STATEMENT);
        assert!(sql.contains("$10000)"));
        assert!(MAX_ROWS_PER_STATEMENT * GRID_COLUMNS.len() < u16::MAX as usize);
    }
}
