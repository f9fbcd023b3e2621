/// Window-level resume state for interrupted runs.
///
/// A plain full re-scan is always safe because the sink skips rows that
/// already exist, but it re-downloads decades of data. With `--resume` the
/// pipeline records every stored (chunk, year) window here and skips them on
/// the next run.
///
/// The file is keyed to the grid layout: if the number of points or the
/// chunk size changes, chunk indices no longer mean the same thing and the
/// saved progress is discarded.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const STATE_FILE: &str = "gridwx_ingest_state.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to access state file '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("State file '{path}' is not valid JSON")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Grid layout a state file was recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridFingerprint {
    pub points: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestState {
    pub fingerprint: GridFingerprint,

    /// Stored years per chunk index.
    #[serde(default)]
    pub completed: BTreeMap<usize, BTreeSet<i32>>,

    /// RFC 3339 time of the last recorded window.
    #[serde(default)]
    pub last_update: Option<String>,
}

impl IngestState {
    pub fn new(fingerprint: GridFingerprint) -> Self {
        Self {
            fingerprint,
            completed: BTreeMap::new(),
            last_update: None,
        }
    }

    pub fn is_complete(&self, chunk_index: usize, year: i32) -> bool {
        self.completed
            .get(&chunk_index)
            .is_some_and(|years| years.contains(&year))
    }

    pub fn mark_complete(&mut self, chunk_index: usize, year: i32) {
        self.completed.entry(chunk_index).or_default().insert(year);
        self.last_update = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn completed_windows(&self) -> usize {
        self.completed.values().map(BTreeSet::len).sum()
    }
}

/// A state file bound to a path on disk.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    state: IngestState,
}

impl Checkpoint {
    /// Opens the state at `path`. A missing file, or one recorded for a
    /// different grid layout, starts fresh.
    pub fn open(path: impl AsRef<Path>, fingerprint: GridFingerprint) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        let shown = path.display().to_string();

        if !path.exists() {
            info!(path = %shown, "no state file found, starting fresh");
            return Ok(Self { path, state: IngestState::new(fingerprint) });
        }

        let contents = fs::read_to_string(&path).map_err(|source| CheckpointError::Io {
            path: shown.clone(),
            source,
        })?;
        let state: IngestState = serde_json::from_str(&contents).map_err(|source| CheckpointError::Format {
            path: shown.clone(),
            source,
        })?;

        if state.fingerprint != fingerprint {
            warn!(
                path = %shown,
                saved = ?state.fingerprint,
                current = ?fingerprint,
                "grid layout changed, discarding saved progress"
            );
            return Ok(Self { path, state: IngestState::new(fingerprint) });
        }

        info!(path = %shown, windows = state.completed_windows(), "loaded ingest state");
        Ok(Self { path, state })
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    pub fn is_complete(&self, chunk_index: usize, year: i32) -> bool {
        self.state.is_complete(chunk_index, year)
    }

    /// Records a stored window and saves immediately.
    pub fn mark_complete(&mut self, chunk_index: usize, year: i32) -> Result<(), CheckpointError> {
        self.state.mark_complete(chunk_index, year);
        self.save()
    }

    pub fn save(&self) -> Result<(), CheckpointError> {
        let shown = self.path.display().to_string();
        let json = serde_json::to_string_pretty(&self.state).map_err(|source| CheckpointError::Format {
            path: shown.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(|source| CheckpointError::Io { path: shown, source })
    }
}
