/// Recent single-station weather samples from the forecast API.
///
/// Fetches the past few days of hourly temperature, humidity and wind for one
/// location. Used by the `fetch_sample` binary to keep the station sample
/// table current for the dashboard.
///
/// API: https://api.open-meteo.com/v1/forecast

use crate::ingest::archive::{classify_status, FetchError};
use chrono::NaiveDateTime;
use serde::Deserialize;

pub const FORECAST_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Default sample station (Beijing).
pub const SAMPLE_LATITUDE: f64 = 39.90;
pub const SAMPLE_LONGITUDE: f64 = 116.40;

const SAMPLE_VARIABLES: [&str; 3] = ["temperature_2m", "relative_humidity_2m", "wind_speed_10m"];

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    hourly: Option<ForecastHourly>,
}

#[derive(Debug, Deserialize)]
struct ForecastHourly {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
}

/// One hourly sample for the station table.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleReading {
    pub timestamp: NaiveDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

/// Builds the forecast URL for `past_days` of history plus `forecast_days`
/// (1 includes today).
pub fn build_forecast_url(
    base_url: &str,
    latitude: f64,
    longitude: f64,
    past_days: u32,
    forecast_days: u32,
) -> String {
    format!(
        "{}?latitude={}&longitude={}&hourly={}&past_days={}&forecast_days={}&timezone=GMT",
        base_url,
        latitude,
        longitude,
        SAMPLE_VARIABLES.join(","),
        past_days,
        forecast_days
    )
}

/// Parses a forecast response. An absent or empty `hourly` block yields an
/// empty list; arrays of unequal length are a decode error.
pub fn parse_forecast_response(json: &str) -> Result<Vec<SampleReading>, FetchError> {
    let response: ForecastResponse = serde_json::from_str(json)
        .map_err(|e| FetchError::Decode(format!("JSON deserialization failed: {}", e)))?;

    let Some(hourly) = response.hourly else {
        return Ok(Vec::new());
    };

    let n = hourly.time.len();
    for (name, len) in [
        ("temperature_2m", hourly.temperature_2m.len()),
        ("relative_humidity_2m", hourly.relative_humidity_2m.len()),
        ("wind_speed_10m", hourly.wind_speed_10m.len()),
    ] {
        if len != n {
            return Err(FetchError::Decode(format!(
                "'{}' has {} values for {} timestamps",
                name, len, n
            )));
        }
    }

    hourly
        .time
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let timestamp = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M")
                .map_err(|e| FetchError::Decode(format!("bad timestamp '{}': {}", t, e)))?;
            Ok(SampleReading {
                timestamp,
                temperature: hourly.temperature_2m[i],
                humidity: hourly.relative_humidity_2m[i],
                wind_speed: hourly.wind_speed_10m[i],
            })
        })
        .collect()
}

/// Fetches the last `past_days` days (plus today) for one location.
pub fn fetch_recent_samples(
    client: &reqwest::blocking::Client,
    base_url: &str,
    latitude: f64,
    longitude: f64,
    past_days: u32,
) -> Result<Vec<SampleReading>, FetchError> {
    let url = build_forecast_url(base_url, latitude, longitude, past_days, 1);
    tracing::info!(%url, "fetching recent samples");

    let response = client.get(&url).send().map_err(FetchError::from_transport)?;
    let status = response.status();
    let body = response.text().map_err(FetchError::from_transport)?;

    if !status.is_success() {
        return Err(classify_status(status.as_u16(), &body));
    }

    parse_forecast_response(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures;

    #[test]
    fn test_parse_forecast_response() {
        let samples = parse_forecast_response(fixtures::fixture_forecast_json()).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].timestamp.to_string(), "2026-10-14 00:00:00");
        assert_eq!(samples[0].temperature, Some(12.5));
        assert_eq!(samples[2].temperature, None);
        assert_eq!(samples[1].humidity, Some(73.0));
    }

    #[test]
    fn test_missing_hourly_block_is_empty() {
        let samples = parse_forecast_response(r#"{"latitude": 39.9, "longitude": 116.4}"#).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_unequal_arrays_rejected() {
        let json = r#"{"hourly": {"time": ["2026-10-14T00:00"],
                       "temperature_2m": [], "relative_humidity_2m": [1], "wind_speed_10m": [1]}}"#;
        assert!(matches!(parse_forecast_response(json), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_build_forecast_url() {
        let url = build_forecast_url(FORECAST_BASE_URL, SAMPLE_LATITUDE, SAMPLE_LONGITUDE, 3, 1);
        assert_eq!(
            url,
            "https://api.open-meteo.com/v1/forecast?latitude=39.9&longitude=116.4\
             &hourly=temperature_2m,relative_humidity_2m,wind_speed_10m&past_days=3&forecast_days=1&timezone=GMT"
        );
    }
}
