/// Service configuration loader - parses gridwx.toml
///
/// Separates tuning knobs (year range, chunk size, pacing, retry budget,
/// proxy controller location) from code, so the ingest can be adjusted
/// without recompiling. Every field has a default; a missing file means
/// "run with defaults".

use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::ingest::archive::ARCHIVE_BASE_URL;

pub const DEFAULT_CONFIG_PATH: &str = "gridwx.toml";

/// Environment variable overriding `egress.secret`.
pub const EGRESS_SECRET_ENV: &str = "EGRESS_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub range: RangeConfig,
    pub grid: GridConfig,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
    pub egress: EgressConfig,
    pub logging: LoggingConfig,
}

/// Archive API endpoint and transport settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Route archive traffic through this proxy (the egress the controller rotates).
    pub proxy_url: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: ARCHIVE_BASE_URL.to_string(),
            timeout_secs: 120,
            proxy_url: None,
        }
    }
}

/// Calendar years to fetch, inclusive. The end is further capped at the
/// current year at run time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    pub start_year: i32,
    pub end_year: i32,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            start_year: 1990,
            end_year: 2023,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// CSV with `latitude,longitude` rows.
    pub path: String,
    /// Points per request. Kept small to bound the blast radius of a quota hit.
    pub chunk_size: NonZeroUsize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            path: "grid_points.csv".to_string(),
            chunk_size: NonZeroUsize::new(5).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Steady-state pacing to stay under the provider's per-minute ceiling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub window_pause_secs: u64,
    pub chunk_pause_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            window_pause_secs: 1,
            chunk_pause_secs: 2,
        }
    }
}

/// What the run does when egress rotation keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustedPolicy {
    /// Abandon the window and move on.
    #[default]
    Skip,
    /// Stop the run.
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Transient retries per window before it is abandoned.
    pub max_attempts: u32,
    /// Linear backoff step: the n-th retry waits `n * backoff_step_secs`.
    pub backoff_step_secs: u64,
    /// Wait before rotating on a per-minute quota hit.
    pub minutely_cooldown_secs: u64,
    /// Wait after a successful rotation for the new path to settle.
    pub stabilization_secs: u64,
    /// Consecutive failed rotations tolerated before giving up.
    pub max_rotation_failures: u32,
    pub rotation_retry_secs: u64,
    pub verify_after_rotate: bool,
    pub on_rotation_exhausted: ExhaustedPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_step_secs: 60,
            minutely_cooldown_secs: 15,
            stabilization_secs: 15,
            max_rotation_failures: 3,
            rotation_retry_secs: 15,
            verify_after_rotate: true,
            on_rotation_exhausted: ExhaustedPolicy::Skip,
        }
    }
}

/// Proxy controller (egress rotation) settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    pub enabled: bool,
    pub host: String,
    /// Ports probed in order for the controller's `/version` endpoint.
    pub candidate_ports: Vec<u16>,
    /// Selector group whose active member is switched.
    pub group: String,
    pub secret: Option<String>,
    pub probe_timeout_ms: u64,
    pub verify_url: String,
    pub verify_attempts: u32,
    pub verify_retry_secs: u64,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            candidate_ports: vec![9090, 9097, 9999, 7890, 7891, 10000],
            group: "GLOBAL".to_string(),
            secret: None,
            probe_timeout_ms: 500,
            verify_url: "https://api.ipify.org?format=json".to_string(),
            verify_attempts: 3,
            verify_retry_secs: 2,
        }
    }
}

impl EgressConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
    /// Also append log lines to this file.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: Some("batch_fetch.log".to_string()),
        }
    }
}

impl Config {
    /// Parses configuration from TOML text and validates it.
    pub fn from_toml(contents: &str, path: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`. A missing file yields the defaults.
    ///
    /// `EGRESS_SECRET` from the environment (or `.env`) overrides the
    /// controller secret so it can stay out of the config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let mut config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: display.clone(),
                source,
            })?;
            Self::from_toml(&contents, &display)?
        } else {
            Self::default()
        };

        if let Ok(secret) = std::env::var(EGRESS_SECRET_ENV) {
            if !secret.is_empty() {
                config.egress.secret = Some(secret);
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.range.start_year > self.range.end_year {
            return Err(ConfigError::Invalid(format!(
                "range.start_year {} is after range.end_year {}",
                self.range.start_year, self.range.end_year
            )));
        }
        if self.egress.enabled && self.egress.candidate_ports.is_empty() {
            return Err(ConfigError::Invalid(
                "egress.candidate_ports must not be empty when egress is enabled".to_string(),
            ));
        }
        if self.egress.enabled && self.egress.group.trim().is_empty() {
            return Err(ConfigError::Invalid("egress.group must not be empty".to_string()));
        }
        Ok(())
    }
}
