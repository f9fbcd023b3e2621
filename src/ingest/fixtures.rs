/// Test fixtures: representative JSON payloads from the weather APIs.
///
/// These are structurally complete but truncated to a few hourly steps.
///
/// Archive response shape (multi-location request):
///   [ { latitude, longitude, generationtime_ms, utc_offset_seconds, timezone,
///       elevation, hourly_units: {...},
///       hourly: { time: [unix seconds], <variable>: [number | null], ... } }, ... ]
///
/// A single-location request returns the bare object instead of an array.
///
/// Error responses carry `{"error": true, "reason": "..."}`; quota
/// rejections use status 429 and name the quota in the first word.

/// Two points, three hourly steps from 2020-01-01T00:00Z, all seven variables.
/// The first point has a missing soil moisture value at step 1.
#[cfg(test)]
pub(crate) fn fixture_two_point_archive_json() -> &'static str {
    r#"[
      {
        "latitude": 39.875, "longitude": 116.375,
        "generationtime_ms": 1.2, "utc_offset_seconds": 0, "timezone": "GMT",
        "timezone_abbreviation": "GMT", "elevation": 44.0,
        "hourly_units": { "time": "unixtime", "temperature_2m": "°C" },
        "hourly": {
          "time": [1577836800, 1577840400, 1577844000],
          "temperature_2m": [-5.2, -5.6, -6.0],
          "precipitation": [0.0, 0.0, 0.1],
          "et0_fao_evapotranspiration": [0.0, 0.0, 0.01],
          "soil_moisture_0_to_7cm": [0.21, null, 0.21],
          "relative_humidity_2m": [55, 57, 60],
          "wind_speed_10m": [7.9, 8.3, 6.1],
          "shortwave_radiation": [0.0, 0.0, 12.0]
        }
      },
      {
        "latitude": 40.0, "longitude": 116.375,
        "generationtime_ms": 1.2, "utc_offset_seconds": 0, "timezone": "GMT",
        "timezone_abbreviation": "GMT", "elevation": 51.0,
        "hourly_units": { "time": "unixtime", "temperature_2m": "°C" },
        "hourly": {
          "time": [1577836800, 1577840400, 1577844000],
          "temperature_2m": [-6.1, -6.4, -6.9],
          "precipitation": [0.0, 0.0, 0.0],
          "et0_fao_evapotranspiration": [0.0, 0.0, 0.0],
          "soil_moisture_0_to_7cm": [0.19, 0.19, 0.19],
          "relative_humidity_2m": [61, 62, 64],
          "wind_speed_10m": [5.0, 5.4, 4.8],
          "shortwave_radiation": [0.0, 0.0, 9.0]
        }
      }
    ]"#
}

/// Single-location request: the provider returns an object, not an array.
#[cfg(test)]
pub(crate) fn fixture_single_point_archive_json() -> &'static str {
    r#"{
      "latitude": 39.875, "longitude": 116.375, "utc_offset_seconds": 0,
      "hourly": {
        "time": [1609459200, 1609462800],
        "temperature_2m": [-9.0, -9.4],
        "precipitation": [0.0, 0.3],
        "et0_fao_evapotranspiration": [0.0, 0.0],
        "soil_moisture_0_to_7cm": [0.2, 0.2],
        "relative_humidity_2m": [40, 41],
        "wind_speed_10m": [12.2, 11.0],
        "shortwave_radiation": [0.0, 0.0]
      }
    }"#
}

#[cfg(test)]
pub(crate) fn fixture_minutely_limit_json() -> &'static str {
    r#"{"error": true, "reason": "Minutely API request limit exceeded. Please try again in one minute."}"#
}

#[cfg(test)]
pub(crate) fn fixture_hourly_limit_json() -> &'static str {
    r#"{"error": true, "reason": "Hourly API request limit exceeded. Please try again in the next hour."}"#
}

#[cfg(test)]
pub(crate) fn fixture_bad_request_json() -> &'static str {
    r#"{"error": true, "reason": "Parameter 'start_date' is out of allowed range from 1940-01-01 to 2026-10-15"}"#
}

/// Forecast API response with ISO 8601 local timestamps, three hourly steps.
#[cfg(test)]
pub(crate) fn fixture_forecast_json() -> &'static str {
    r#"{
      "latitude": 39.875, "longitude": 116.375, "utc_offset_seconds": 0,
      "timezone": "GMT",
      "hourly_units": { "time": "iso8601", "temperature_2m": "°C" },
      "hourly": {
        "time": ["2026-10-14T00:00", "2026-10-14T01:00", "2026-10-14T02:00"],
        "temperature_2m": [12.5, 12.1, null],
        "relative_humidity_2m": [71, 73, 75],
        "wind_speed_10m": [4.3, 3.9, 3.5]
      }
    }"#
}
