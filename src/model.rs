/// Shared data types for the grid weather ingestion service.
///
/// Everything that crosses a module boundary lives here: grid points,
/// normalized weather records, egress node names and the fixed list of
/// hourly variables requested from the archive API.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Archive variables
// ---------------------------------------------------------------------------

/// Hourly variables requested for every window, in column order.
///
/// The order matters: the response normalizer zips the provider's arrays
/// into `WeatherRecord` fields by position in this list.
pub const HOURLY_VARIABLES: [&str; 7] = [
    "temperature_2m",
    "precipitation",
    "et0_fao_evapotranspiration",
    "soil_moisture_0_to_7cm",
    "relative_humidity_2m",
    "wind_speed_10m",
    "shortwave_radiation",
];

/// Target table for grid records. Created by the schema bootstrap scripts.
pub const GRID_TABLE: &str = "grid_weather_data";

/// Column list for `GRID_TABLE` inserts, matching `WeatherRecord::values()`.
pub const GRID_COLUMNS: [&str; 10] = [
    "latitude",
    "longitude",
    "timestamp",
    "temperature",
    "precipitation",
    "et0_fao_evapotranspiration",
    "soil_moisture_0_to_7cm",
    "relative_humidity_2m",
    "wind_speed_10m",
    "shortwave_radiation",
];

/// Decimal places kept on grid coordinates.
pub const GRID_PRECISION: i32 = 2;

// ---------------------------------------------------------------------------
// Grid points
// ---------------------------------------------------------------------------

/// A single grid location.
///
/// Coordinates are rounded to `GRID_PRECISION` decimals on construction so
/// the same point always produces the same (latitude, longitude) key in the
/// database, regardless of how it was computed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    latitude: f64,
    longitude: f64,
}

impl GridPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: round_coordinate(latitude),
            longitude: round_coordinate(longitude),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Rounds a coordinate to `GRID_PRECISION` decimal places.
pub fn round_coordinate(value: f64) -> f64 {
    let factor = 10f64.powi(GRID_PRECISION);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Weather records
// ---------------------------------------------------------------------------

/// One hourly observation for one grid point.
///
/// `(latitude, longitude, timestamp)` is the natural key; uniqueness is
/// enforced by the table constraint, not here. Missing provider values are
/// `None` and land as SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRecord {
    pub latitude: f64,
    pub longitude: f64,
    /// UTC, hour resolution.
    pub timestamp: NaiveDateTime,
    pub temperature: Option<f64>,
    pub precipitation: Option<f64>,
    pub et0: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub radiation: Option<f64>,
}

impl WeatherRecord {
    /// The seven variable values in `HOURLY_VARIABLES` order.
    pub fn values(&self) -> [Option<f64>; 7] {
        [
            self.temperature,
            self.precipitation,
            self.et0,
            self.soil_moisture,
            self.humidity,
            self.wind_speed_10m,
            self.radiation,
        ]
    }
}

// ---------------------------------------------------------------------------
// Egress nodes
// ---------------------------------------------------------------------------

/// Opaque name of an alternate network egress path known to the proxy
/// controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EgressNode {
    pub name: String,
}

impl EgressNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for EgressNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
