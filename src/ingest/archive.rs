/// Historical weather archive API client.
///
/// Handles URL construction, failure classification and JSON decoding for
/// the hourly archive endpoint:
///   https://archive-api.open-meteo.com/v1/archive
///
/// One request carries every point of a chunk as parallel `latitude` and
/// `longitude` lists plus a one-year date range. The provider answers with
/// one object per point (a bare object when only one point was requested):
///
///   [{ "latitude": 39.875, "longitude": 116.375,
///      "hourly": { "time": [unix seconds...],
///                  "temperature_2m": [...], "precipitation": [...], ... } }, ...]
///
/// Errors come back as `{"error": true, "reason": "..."}` with status 400,
/// or 429 when a request quota is exhausted. See `fixtures.rs` for samples.

use crate::config::ArchiveConfig;
use crate::ingest::build_http_client;
use crate::model::HOURLY_VARIABLES;
use crate::windows::FetchWindow;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const ARCHIVE_BASE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Fallback step when a point has a single timestamp.
const DEFAULT_INTERVAL_SECS: i64 = 3600;

const LIMIT_EXCEEDED: &str = "api request limit exceeded";

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Which provider quota was exhausted, from the leading word of the
/// provider's `reason` ("Minutely API request limit exceeded...").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    Minutely,
    Hourly,
    Daily,
    Monthly,
    Unknown,
}

impl QuotaScope {
    pub fn from_reason(reason: &str) -> Self {
        let first = reason
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        match first.as_str() {
            "minutely" => QuotaScope::Minutely,
            "hourly" => QuotaScope::Hourly,
            "daily" => QuotaScope::Daily,
            "monthly" => QuotaScope::Monthly,
            _ => QuotaScope::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaScope::Minutely => "minutely",
            QuotaScope::Hourly => "hourly",
            QuotaScope::Daily => "daily",
            QuotaScope::Monthly => "monthly",
            QuotaScope::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the fetch loop should react to a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Provider rate/volume limit: change egress, then retry.
    Quota(QuotaScope),
    /// Connection-level or upstream 5xx: wait, then retry.
    Transient,
    /// Anything else: give up on this window.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("archive {scope} quota exceeded: {reason}")]
    QuotaExceeded { scope: QuotaScope, reason: String },

    #[error("connection to archive failed: {0}")]
    Connection(String),

    #[error("archive server error {status}: {reason}")]
    Server { status: u16, reason: String },

    #[error("archive rejected request with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("invalid archive request: {0}")]
    Request(String),

    #[error("failed to decode archive response: {0}")]
    Decode(String),

    #[error("archive returned {found} points for a {expected}-point request")]
    PointCountMismatch { expected: usize, found: usize },
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::QuotaExceeded { scope, .. } => FailureClass::Quota(*scope),
            FetchError::Connection(_) | FetchError::Server { .. } => FailureClass::Transient,
            FetchError::Rejected { .. }
            | FetchError::Request(_)
            | FetchError::Decode(_)
            | FetchError::PointCountMismatch { .. } => FailureClass::Fatal,
        }
    }

    /// Maps a transport error. Connect, timeout and mid-body failures are
    /// worth retrying; builder, redirect and decode failures are not.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_builder() || err.is_redirect() || err.is_decode() {
            FetchError::Request(err.to_string())
        } else {
            FetchError::Connection(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    reason: String,
}

/// The provider reports exhausted quotas as "<Scope> API request limit
/// exceeded", not always with a 429.
fn is_limit_reason(reason: &str) -> bool {
    reason.to_ascii_lowercase().contains(LIMIT_EXCEEDED)
}

/// Classifies a non-success HTTP response by status and error body.
pub fn classify_status(status: u16, body: &str) -> FetchError {
    let reason = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.reason)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        429 => FetchError::QuotaExceeded {
            scope: QuotaScope::from_reason(&reason),
            reason,
        },
        _ if is_limit_reason(&reason) => FetchError::QuotaExceeded {
            scope: QuotaScope::from_reason(&reason),
            reason,
        },
        500..=599 => FetchError::Server { status, reason },
        _ => FetchError::Rejected { status, reason },
    }
}

// ---------------------------------------------------------------------------
// Response structures
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum ArchiveBody {
    Many(Vec<ArchivePoint>),
    One(ArchivePoint),
}

#[derive(Deserialize)]
struct ArchivePoint {
    latitude: f64,
    longitude: f64,
    hourly: HourlyBlock,
}

#[derive(Deserialize)]
struct HourlyBlock {
    time: Vec<i64>,
    #[serde(flatten)]
    columns: HashMap<String, Vec<Option<f64>>>,
}

/// Columnar hourly data for one requested point.
///
/// The timestamp axis is declared as `[start, end)` stepped by `interval`
/// (unix seconds); `columns` holds one array per entry of
/// `HOURLY_VARIABLES`, in that order.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSeries {
    /// Provider-snapped coordinates (informational).
    pub latitude: f64,
    pub longitude: f64,
    pub start: i64,
    pub end: i64,
    pub interval: i64,
    pub columns: Vec<Vec<Option<f64>>>,
}

/// Decodes an archive response body into per-point series.
pub fn decode_archive_response(body: &str) -> Result<Vec<PointSeries>, FetchError> {
    let parsed: ArchiveBody = serde_json::from_str(body)
        .map_err(|e| FetchError::Decode(format!("JSON deserialization failed: {}", e)))?;

    let points = match parsed {
        ArchiveBody::Many(points) => points,
        ArchiveBody::One(point) => vec![point],
    };

    points.into_iter().map(into_series).collect()
}

fn into_series(point: ArchivePoint) -> Result<PointSeries, FetchError> {
    let HourlyBlock { time, mut columns } = point.hourly;

    let interval = match time.as_slice() {
        [first, second, ..] => second - first,
        _ => DEFAULT_INTERVAL_SECS,
    };
    let (start, end) = match (time.first(), time.last()) {
        (Some(first), Some(last)) => (*first, last + interval),
        _ => (0, 0),
    };

    let mut ordered = Vec::with_capacity(HOURLY_VARIABLES.len());
    for name in HOURLY_VARIABLES {
        let column = columns
            .remove(name)
            .ok_or_else(|| FetchError::Decode(format!("missing hourly variable '{}'", name)))?;
        ordered.push(column);
    }

    Ok(PointSeries {
        latitude: point.latitude,
        longitude: point.longitude,
        start,
        end,
        interval,
        columns: ordered,
    })
}

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Builds the archive URL for one window: every point of the chunk, the
/// window's calendar year, the fixed hourly variable list, unix timestamps
/// in UTC.
pub fn build_archive_url(base_url: &str, window: &FetchWindow<'_>) -> String {
    let latitudes: Vec<String> = window.points.iter().map(|p| p.latitude().to_string()).collect();
    let longitudes: Vec<String> = window.points.iter().map(|p| p.longitude().to_string()).collect();

    format!(
        "{}?latitude={}&longitude={}&start_date={}&end_date={}&hourly={}&timeformat=unixtime&timezone=GMT",
        base_url,
        latitudes.join(","),
        longitudes.join(","),
        window.start_date().format("%Y-%m-%d"),
        window.end_date().format("%Y-%m-%d"),
        HOURLY_VARIABLES.join(","),
    )
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Anything that can answer a window request with per-point series.
pub trait ArchiveSource {
    fn fetch(&self, window: &FetchWindow<'_>) -> Result<Vec<PointSeries>, FetchError>;
}

pub struct ArchiveClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl ArchiveClient {
    pub fn new(config: &ArchiveConfig) -> Result<Self, FetchError> {
        let http = build_http_client(
            Duration::from_secs(config.timeout_secs),
            config.proxy_url.as_deref(),
        )
        .map_err(|e| FetchError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }
}

impl ArchiveSource for ArchiveClient {
    fn fetch(&self, window: &FetchWindow<'_>) -> Result<Vec<PointSeries>, FetchError> {
        let url = build_archive_url(&self.base_url, window);
        tracing::debug!(chunk = window.chunk_index, year = window.year, %url, "requesting archive window");

        let response = self.http.get(&url).send().map_err(FetchError::from_transport)?;
        let status = response.status();
        let body = response.text().map_err(FetchError::from_transport)?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }

        let series = decode_archive_response(&body)?;
        if series.len() != window.points.len() {
            return Err(FetchError::PointCountMismatch {
                expected: window.points.len(),
                found: series.len(),
            });
        }

        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures;
    use crate::model::GridPoint;

    #[test]
    fn test_quota_scope_from_reason() {
        assert_eq!(
            QuotaScope::from_reason("Minutely API request limit exceeded. Please try again in one minute."),
            QuotaScope::Minutely
        );
        assert_eq!(QuotaScope::from_reason("Hourly API request limit exceeded."), QuotaScope::Hourly);
        assert_eq!(QuotaScope::from_reason("Daily API request limit exceeded."), QuotaScope::Daily);
        assert_eq!(QuotaScope::from_reason("Too many requests"), QuotaScope::Unknown);
        assert_eq!(QuotaScope::from_reason(""), QuotaScope::Unknown);
    }

    #[test]
    fn test_classify_429_as_quota() {
        let err = classify_status(429, fixtures::fixture_minutely_limit_json());
        assert_eq!(err.class(), FailureClass::Quota(QuotaScope::Minutely));

        let err = classify_status(429, fixtures::fixture_hourly_limit_json());
        assert_eq!(err.class(), FailureClass::Quota(QuotaScope::Hourly));
    }

    #[test]
    fn test_classify_429_without_json_body() {
        let err = classify_status(429, "Too Many Requests");
        assert_eq!(err.class(), FailureClass::Quota(QuotaScope::Unknown));
    }

    #[test]
    fn test_limit_reason_is_quota_on_any_status() {
        let err = classify_status(400, fixtures::fixture_hourly_limit_json());
        assert_eq!(err.class(), FailureClass::Quota(QuotaScope::Hourly));

        let err = classify_status(503, fixtures::fixture_minutely_limit_json());
        assert_eq!(err.class(), FailureClass::Quota(QuotaScope::Minutely));
    }

    #[test]
    fn test_classify_5xx_as_transient() {
        assert_eq!(classify_status(502, "Bad Gateway").class(), FailureClass::Transient);
        assert_eq!(classify_status(503, "").class(), FailureClass::Transient);
    }

    #[test]
    fn test_classify_400_as_fatal_with_reason() {
        let err = classify_status(400, fixtures::fixture_bad_request_json());
        assert_eq!(err.class(), FailureClass::Fatal);
        match err {
            FetchError::Rejected { status, reason } => {
                assert_eq!(status, 400);
                assert!(reason.contains("Parameter 'start_date'"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_connection_error_is_transient() {
        assert_eq!(FetchError::Connection("reset".into()).class(), FailureClass::Transient);
        assert_eq!(FetchError::Decode("bad".into()).class(), FailureClass::Fatal);
        assert_eq!(
            FetchError::PointCountMismatch { expected: 5, found: 4 }.class(),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_decode_multi_point_response() {
        let series = decode_archive_response(fixtures::fixture_two_point_archive_json()).unwrap();
        assert_eq!(series.len(), 2);

        let first = &series[0];
        assert_eq!(first.start, 1577836800); // 2020-01-01T00:00:00Z
        assert_eq!(first.interval, 3600);
        assert_eq!(first.end, 1577836800 + 3 * 3600);
        assert_eq!(first.columns.len(), HOURLY_VARIABLES.len());
        assert_eq!(first.columns[0], vec![Some(-5.2), Some(-5.6), Some(-6.0)]);
        // soil moisture has a gap
        assert_eq!(first.columns[3][1], None);

        assert_eq!(series[1].latitude, 40.0);
    }

    #[test]
    fn test_decode_single_object_response() {
        let series = decode_archive_response(fixtures::fixture_single_point_archive_json()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].columns[1], vec![Some(0.0), Some(0.3)]);
    }

    #[test]
    fn test_decode_missing_variable_fails() {
        let json = r#"{"latitude": 39.9, "longitude": 116.4,
                       "hourly": {"time": [0, 3600], "temperature_2m": [1.0, 2.0]}}"#;
        match decode_archive_response(json) {
            Err(FetchError::Decode(msg)) => assert!(msg.contains("precipitation")),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode_archive_response("<html>"), Err(FetchError::Decode(_))));
    }

    #[test]
    fn test_build_archive_url() {
        let pts = vec![GridPoint::new(39.9, 116.4), GridPoint::new(40.0, 116.5)];
        let window = FetchWindow { chunk_index: 0, year: 2021, points: &pts };
        let url = build_archive_url(ARCHIVE_BASE_URL, &window);

        assert!(url.starts_with("https://archive-api.open-meteo.com/v1/archive?"));
        assert!(url.contains("latitude=39.9,40&"));
        assert!(url.contains("longitude=116.4,116.5&"));
        assert!(url.contains("start_date=2021-01-01"));
        assert!(url.contains("end_date=2021-12-31"));
        assert!(url.contains(
            "hourly=temperature_2m,precipitation,et0_fao_evapotranspiration,soil_moisture_0_to_7cm,\
             relative_humidity_2m,wind_speed_10m,shortwave_radiation"
        ));
        assert!(url.contains("timeformat=unixtime"));
    }
}
