//! # Persisted Tracker State
//!
//! After every successful poll the tracker writes a small JSON file holding
//! the snapshots it just built and the running consumption totals. On startup
//! the file is read back so that:
//!
//! - the consumption meters resume from their last total instead of zero, and
//! - the last good snapshots can be shown (marked stale) if the first poll
//!   fails.
//!
//! A missing or corrupt file is never fatal; the tracker simply starts fresh.

use crate::{SensitError, TankSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default state file location
pub const DEFAULT_STATE_PATH: &str = "tank-state.json";

/// Everything that survives a restart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    /// When the snapshots were built
    pub updated: Option<DateTime<Utc>>,
    /// Snapshots of the last successful poll
    pub snapshots: Vec<TankSnapshot>,
    /// Consumption totals in kWh keyed by tank serial number
    pub consumption_kwh: BTreeMap<String, f64>,
}

/// Reads and writes [`SavedState`] as JSON.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved state, falling back to an empty state on any failure.
    pub fn load(&self) -> SavedState {
        match self.try_load() {
            Ok(state) => state,
            Err(e) => {
                tracing::info!(path = %self.path.display(), "No usable saved state: {e}");
                SavedState::default()
            }
        }
    }

    fn try_load(&self) -> Result<SavedState, SensitError> {
        let data = fs::read(&self.path)?;
        let state = serde_json::from_slice(&data)?;
        Ok(state)
    }

    pub fn save(&self, state: &SavedState) -> Result<(), SensitError> {
        let data = serde_json::to_vec_pretty(state)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{History, Reading};
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn sample_state() -> SavedState {
        let read = Utc.with_ymd_and_hms(2024, 3, 20, 0, 30, 0).unwrap();
        SavedState {
            updated: Some(read),
            snapshots: vec![TankSnapshot {
                serial_number: "20001234".to_string(),
                model: "Acme Tank".to_string(),
                name: "Tank".to_string(),
                level: 1000.0,
                capacity: 2000.0,
                last_read: read,
                history: History::new(vec![Reading {
                    reading_date: read,
                    level_litres: 1000.0,
                }])
                .unwrap(),
                usage_rate: 96.7,
                forecast_empty_days: 10,
                history_available: true,
            }],
            consumption_kwh: BTreeMap::from([("20001234".to_string(), 1234.5)]),
        }
    }

    #[test]
    fn test_state_survives_restart() {
        let temp_file = NamedTempFile::new().unwrap();
        let store = StateStore::new(temp_file.path());

        store.save(&sample_state()).unwrap();
        assert_eq!(store.load(), sample_state());
    }

    #[test]
    fn test_missing_state_starts_fresh() {
        let store = StateStore::new("/nonexistent/tank-state.json");
        assert_eq!(store.load(), SavedState::default());
    }

    #[test]
    fn test_corrupt_state_starts_fresh() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), b"{ not json").unwrap();
        assert_eq!(StateStore::new(temp_file.path()).load(), SavedState::default());
    }
}
