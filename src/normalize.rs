/// Reshapes columnar per-point archive series into flat hourly records.
///
/// For each point the hourly axis is rebuilt from the declared `[start, end)`
/// range and interval, then every variable column is zipped against it. A
/// column whose length disagrees with the axis fails the whole window: no
/// partial record set is ever produced.

use crate::ingest::archive::PointSeries;
use crate::model::{GridPoint, WeatherRecord, HOURLY_VARIABLES};
use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error(
        "data alignment error at point ({latitude}, {longitude}): '{variable}' has {found} values for {expected} timestamps"
    )]
    DataAlignment {
        latitude: f64,
        longitude: f64,
        variable: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid time axis at point ({latitude}, {longitude}): {message}")]
    InvalidTimeAxis {
        latitude: f64,
        longitude: f64,
        message: String,
    },

    #[error("{series} series returned for {points} requested points")]
    PointCount { points: usize, series: usize },
}

/// Expands `[start, end)` stepped by `interval` into UTC timestamps.
pub fn hourly_axis(start: i64, end: i64, interval: i64) -> Result<Vec<NaiveDateTime>, String> {
    if interval <= 0 {
        return Err(format!("non-positive interval {}", interval));
    }
    if end < start {
        return Err(format!("end {} before start {}", end, start));
    }

    (start..end)
        .step_by(interval as usize)
        .map(|secs| {
            DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| format!("timestamp {} out of range", secs))
        })
        .collect()
}

/// Normalizes one window's response.
///
/// `points` are the requested grid points, in request order; the provider
/// answers in the same order, and records carry the requested (rounded)
/// coordinates so the natural key stays stable across runs.
pub fn normalize_window(
    points: &[GridPoint],
    series: &[PointSeries],
) -> Result<Vec<WeatherRecord>, NormalizeError> {
    if points.len() != series.len() {
        return Err(NormalizeError::PointCount {
            points: points.len(),
            series: series.len(),
        });
    }

    let mut records = Vec::new();
    for (point, s) in points.iter().zip(series) {
        records.extend(normalize_point(point, s)?);
    }
    Ok(records)
}

fn normalize_point(
    point: &GridPoint,
    series: &PointSeries,
) -> Result<Vec<WeatherRecord>, NormalizeError> {
    let axis = hourly_axis(series.start, series.end, series.interval).map_err(|message| {
        NormalizeError::InvalidTimeAxis {
            latitude: point.latitude(),
            longitude: point.longitude(),
            message,
        }
    })?;

    if series.columns.len() != HOURLY_VARIABLES.len() {
        return Err(NormalizeError::InvalidTimeAxis {
            latitude: point.latitude(),
            longitude: point.longitude(),
            message: format!(
                "expected {} variable columns, got {}",
                HOURLY_VARIABLES.len(),
                series.columns.len()
            ),
        });
    }

    for (name, column) in HOURLY_VARIABLES.iter().zip(&series.columns) {
        if column.len() != axis.len() {
            return Err(NormalizeError::DataAlignment {
                latitude: point.latitude(),
                longitude: point.longitude(),
                variable: *name,
                expected: axis.len(),
                found: column.len(),
            });
        }
    }

    let c = &series.columns;
    Ok(axis
        .into_iter()
        .enumerate()
        .map(|(i, timestamp)| WeatherRecord {
            latitude: point.latitude(),
            longitude: point.longitude(),
            timestamp,
            temperature: c[0][i],
            precipitation: c[1][i],
            et0: c[2][i],
            soil_moisture: c[3][i],
            humidity: c[4][i],
            wind_speed_10m: c[5][i],
            radiation: c[6][i],
        })
        .collect())
}
