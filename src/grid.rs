/// Grid point loading and chunking.
///
/// Grid geometry is generated elsewhere and handed over as a CSV file with a
/// `latitude,longitude` header. This module reads that file into an ordered
/// list of `GridPoint`s and splits the list into small request-sized chunks.

use crate::model::GridPoint;
use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Failed to read grid file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed grid CSV")]
    Csv(#[from] csv::Error),

    #[error("Grid file line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("Grid file '{0}' contains no points")]
    Empty(String),
}

/// One row of the grid file. Other columns are ignored.
#[derive(Debug, Deserialize)]
struct GridRow {
    latitude: f64,
    longitude: f64,
}

/// A bounded group of consecutive grid points fetched in one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridChunk<'a> {
    /// Zero-based position of this chunk in the run.
    pub index: usize,
    pub points: &'a [GridPoint],
}

impl GridChunk<'_> {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Splits `points` into `ceil(N / chunk_size)` chunks, preserving order.
/// Every chunk holds `chunk_size` points except possibly the last.
pub fn chunk_points(points: &[GridPoint], chunk_size: NonZeroUsize) -> Vec<GridChunk<'_>> {
    points
        .chunks(chunk_size.get())
        .enumerate()
        .map(|(index, points)| GridChunk { index, points })
        .collect()
}

/// Loads grid points from a CSV file.
pub fn load_grid_csv(path: impl AsRef<Path>) -> Result<Vec<GridPoint>, GridError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| GridError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let points = parse_grid_csv(&contents)?;
    if points.is_empty() {
        return Err(GridError::Empty(path.display().to_string()));
    }
    Ok(points)
}

/// Parses a CSV with `latitude` and `longitude` header columns. Lines
/// starting with `#` are skipped.
pub fn parse_grid_csv(contents: &str) -> Result<Vec<GridPoint>, GridError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(contents.as_bytes());

    let headers = reader.headers()?.clone();
    let mut record = csv::StringRecord::new();
    let mut points = Vec::new();

    while reader.read_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());
        let row: GridRow = record.deserialize(Some(&headers)).map_err(|e| GridError::Parse {
            line,
            message: e.to_string(),
        })?;

        check_range(row.latitude, line, -90.0, 90.0)?;
        check_range(row.longitude, line, -180.0, 180.0)?;
        points.push(GridPoint::new(row.latitude, row.longitude));
    }

    Ok(points)
}

fn check_range(value: f64, line: u64, min: f64, max: f64) -> Result<(), GridError> {
    if !(min..=max).contains(&value) {
        return Err(GridError::Parse {
            line,
            message: format!("coordinate {} outside [{}, {}]", value, min, max),
        });
    }
    Ok(())
}
