//! Per-module sync state, stored as `<base>/<module>/metadata.json`.
//!
//! The presence of `<prefix><id>.xml` is the primary watermark. This file
//! adds what presence cannot express: when the last harvest started, and
//! the remote `_last_modified` value each document had when it was written,
//! which the optional timestamp check in update mode compares against.

use crate::atomic::{self, Placement};
use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the sync state inside the module directory.
pub const SYNC_STATE_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Start time of the last completed harvest.
    pub last_updated: Option<DateTime<Utc>>,
    /// Keyed by document file name.
    #[serde(default)]
    pub files: BTreeMap<String, FileState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    /// Remote `_last_modified` when the document was written.
    pub last_updated: Option<String>,
}

impl SyncState {
    pub fn path(module_dir: &Path) -> PathBuf {
        module_dir.join(SYNC_STATE_FILE)
    }

    /// Load the state, starting fresh when the file is missing or unreadable.
    pub fn load(module_dir: &Path) -> Self {
        let path = Self::path(module_dir);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Ignoring unreadable sync state {}: {}", path.display(), e);
                SyncState::default()
            }),
            Err(_) => SyncState::default(),
        }
    }

    /// Persist atomically.
    pub fn save(&self, module_dir: &Path) -> Result<(), IngestError> {
        let path = Self::path(module_dir);
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| IngestError::Internal(format!("serialising sync state: {e}")))?;
        atomic::write_bytes(&path, &bytes, Placement::Replace).map_err(|e| IngestError::fs(&path, e))?;
        Ok(())
    }

    pub fn record(&mut self, file_name: &str, last_modified: Option<&str>) {
        self.files.insert(
            file_name.to_string(),
            FileState {
                last_updated: last_modified.map(str::to_string),
            },
        );
    }

    /// Whether the remote item changed since `file_name` was written.
    ///
    /// Unknown local or remote timestamps count as unchanged.
    pub fn is_stale(&self, file_name: &str, remote_modified: Option<&str>) -> bool {
        let Some(remote) = remote_modified else {
            return false;
        };
        let Some(local) = self.files.get(file_name).and_then(|f| f.last_updated.as_deref()) else {
            return false;
        };
        is_newer(remote, local)
    }
}

/// Compare two EasyDB timestamps; RFC 3339 when both parse, text otherwise.
fn is_newer(remote: &str, local: &str) -> bool {
    match (
        DateTime::parse_from_rfc3339(remote),
        DateTime::parse_from_rfc3339(local),
    ) {
        (Ok(r), Ok(l)) => r > l,
        _ => remote > local,
    }
}
