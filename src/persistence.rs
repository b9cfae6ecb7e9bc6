//! Settings persistence
//!
//! The original display settings captured during a modification episode are
//! written to disk so they survive a host crash. On the next start the file
//! is loaded and the settings reverted before any new session touches the
//! displays. Absence of the file means there is nothing to revert.

use crate::topology;
use crate::types::{DeviceId, DisplayMode, HdrState, TopologyPair};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Persistence error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file contents are not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything needed to restore the displays to their pre-session state.
///
/// One record describes one modification episode. A fresh record with an
/// equivalent topology pair and empty originals means nothing was changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentData {
    /// Topologies at the start and end of the episode
    pub topology: TopologyPair,

    /// Primary device before the episode ("" = primary untouched)
    #[serde(default)]
    pub original_primary_display: DeviceId,

    /// Display modes before the episode (empty = modes untouched)
    #[serde(default)]
    pub original_modes: BTreeMap<DeviceId, DisplayMode>,

    /// HDR states before the episode (empty = HDR untouched)
    #[serde(default)]
    pub original_hdr_states: BTreeMap<DeviceId, HdrState>,
}

impl PersistentData {
    /// Start a record for an episode anchored on `topology`
    pub fn new(topology: TopologyPair) -> Self {
        Self {
            topology,
            ..Default::default()
        }
    }

    /// Whether this record describes any actual display change.
    ///
    /// True when the topology pair differs (order-insensitively) or any of
    /// the per-phase originals were captured.
    pub fn contains_modifications(&self) -> bool {
        !topology::is_equivalent(&self.topology.initial, &self.topology.modified)
            || !self.original_primary_display.is_empty()
            || !self.original_modes.is_empty()
            || !self.original_hdr_states.is_empty()
    }
}

/// JSON-file backed store for [`PersistentData`]
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store backed by the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The per-user default location, `None` when the platform has no local
    /// data directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("lamco").join("original_display_settings.json"))
    }

    /// The file this store reads and writes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record, `None` when the file does not exist
    pub fn load(&self) -> Result<Option<PersistentData>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Write the record, replacing any previous one.
    ///
    /// Writes go to a temporary sibling first and are renamed over the
    /// target so a crash mid-write cannot leave a truncated file.
    pub fn save(&self, data: &PersistentData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(data)?;
        let staged = self.path.with_extension("json.tmp");
        fs::write(&staged, json)?;
        fs::rename(&staged, &self.path)?;

        debug!(path = %self.path.display(), "saved original display settings");
        Ok(())
    }

    /// Delete the record. Deleting a missing file is not an error.
    pub fn remove(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed original display settings");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
