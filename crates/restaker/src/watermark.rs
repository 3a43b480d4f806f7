//! Vesting Watermark Persistence
//!
//! Remembers the last epoch the user was notified about so restarts do not repeat
//! notifications. The value only ever moves forward.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Current schema version
const SCHEMA_VERSION: u32 = 1;

/// On-disk watermark document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkState {
    /// Schema version for forward compatibility
    pub version: u32,
    /// Highest epoch a notification was emitted for
    pub last_notified_epoch: u64,
    /// When the watermark last moved
    pub updated_at: DateTime<Utc>,
}

/// File backed watermark with an in-memory copy
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    current: Mutex<u64>,
}

impl WatermarkStore {
    /// Opens the store at `path`. A missing or unreadable file starts from zero.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = if path.exists() {
            match Self::load(&path) {
                Ok(state) => {
                    info!(
                        target: "epoch_watcher",
                        epoch = state.last_notified_epoch,
                        "Loaded vesting watermark"
                    );
                    state.last_notified_epoch
                }
                Err(e) => {
                    warn!(
                        target: "epoch_watcher",
                        error = %e,
                        "Failed to load watermark, starting from zero"
                    );
                    0
                }
            }
        } else {
            0
        };
        Self { path, current: Mutex::new(current) }
    }

    fn load(path: &Path) -> Result<WatermarkState> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read watermark file: {}", path.display()))?;
        let state: WatermarkState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse watermark file: {}", path.display()))?;
        if state.version != SCHEMA_VERSION {
            warn!(
                target: "epoch_watcher",
                "Watermark file version {} differs from current version {}",
                state.version,
                SCHEMA_VERSION
            );
        }
        Ok(state)
    }

    /// Last notified epoch
    pub fn get(&self) -> u64 {
        *self.current.lock()
    }

    /// Moves the watermark to `epoch` and persists it. Lower values are ignored.
    ///
    /// Returns whether the watermark moved.
    pub fn advance(&self, epoch: u64, now: DateTime<Utc>) -> Result<bool> {
        let mut current = self.current.lock();
        if epoch <= *current {
            return Ok(false);
        }
        let state =
            WatermarkState { version: SCHEMA_VERSION, last_notified_epoch: epoch, updated_at: now };
        Self::save(&self.path, &state)?;
        *current = epoch;
        Ok(true)
    }

    fn save(path: &Path, state: &WatermarkState) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(state).context("Failed to serialize watermark")?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content)
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
        fs::rename(&temp_path, path).with_context(|| {
            format!("Failed to rename {} to {}", temp_path.display(), path.display())
        })?;

        debug!(
            target: "epoch_watcher",
            epoch = state.last_notified_epoch,
            "Saved vesting watermark"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_advance_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vesting_watermark.json");

        let store = WatermarkStore::open(&path);
        assert_eq!(store.get(), 0);
        assert!(store.advance(12, Utc::now()).unwrap());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = WatermarkStore::open(&path);
        assert_eq!(reopened.get(), 12);
    }

    #[test]
    fn test_never_moves_backwards() {
        let dir = TempDir::new().unwrap();
        let store = WatermarkStore::open(dir.path().join("w.json"));

        store.advance(7, Utc::now()).unwrap();
        assert!(!store.advance(5, Utc::now()).unwrap());
        assert!(!store.advance(7, Utc::now()).unwrap());
        assert_eq!(store.get(), 7);
    }

    #[test]
    fn test_corrupt_file_starts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("w.json");
        fs::write(&path, "{not json").unwrap();

        assert_eq!(WatermarkStore::open(&path).get(), 0);
    }
}
