//! Indicator snapshots for crash recovery.
//!
//! Positions are recovered from the exchange via sync; only the indicator
//! state (SAR tuple and the CCI history tail) is persisted, as JSON, one
//! file per session. Missing or corrupt files degrade to fresh state.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use grid_hedge_core::indicators::SarState;

/// How many trailing CCI values are persisted.
pub const CCI_TAIL: usize = 50;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted indicator state for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub sar: Option<SarState>,
    /// Trailing CCI values, oldest first.
    pub cci_history: Vec<Decimal>,
    pub saved_at: DateTime<Utc>,
}

impl IndicatorSnapshot {
    #[must_use]
    pub fn new(sar: Option<SarState>, cci_history: Vec<Decimal>) -> Self {
        Self {
            sar,
            cci_history,
            saved_at: Utc::now(),
        }
    }
}

/// Saves and loads one session's indicator snapshot.
#[derive(Debug, Clone)]
pub struct IndicatorPersistence {
    path: PathBuf,
}

impl IndicatorPersistence {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Conventional per-session file under the state directory.
    #[must_use]
    pub fn for_session(state_dir: &Path, user_id: &str) -> Self {
        Self::new(state_dir.join(format!("{user_id}.json")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the snapshot. A missing or corrupt file yields `Ok(None)` with
    /// a warning; only real IO failures error.
    pub fn load(&self) -> Result<Option<IndicatorSnapshot>, PersistenceError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_reader(BufReader::new(file)) {
            Ok(snapshot) => {
                debug!(path = %self.path.display(), "indicator snapshot loaded");
                Ok(Some(snapshot))
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "corrupt indicator snapshot, starting fresh"
                );
                Ok(None)
            }
        }
    }

    /// Writes the snapshot, creating the state directory if needed.
    pub fn save(&self, snapshot: &IndicatorSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        serde_json::to_writer(BufWriter::new(file), snapshot)?;
        debug!(path = %self.path.display(), "indicator snapshot saved");
        Ok(())
    }
}
