//! Result types returned by the pipeline stages.
//!
//! All of them are `Serialize` so the CLI can print them as JSON and an
//! orchestrator can archive them next to the run logs.

use crate::error::{IngestError, ItemError};
use crate::table::{self, AssetRow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Harvest ──────────────────────────────────────────────────────────────

/// Summary of one [`crate::harvest`] run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestReport {
    /// Module that was harvested.
    pub module: String,
    /// Items returned by the remote listing.
    pub listed: usize,
    /// Documents written (created or replaced).
    pub written: usize,
    /// Items left alone because a current local document exists.
    pub skipped: usize,
    /// Items whose fetch or write failed, with the reason.
    pub failed: Vec<FailedItem>,
    pub duration_ms: u64,
}

/// One item the harvester could not store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub error: ItemError,
}

// ── Extract ──────────────────────────────────────────────────────────────

/// Summary of one [`crate::extract`] run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractReport {
    /// Path of the generated table.
    pub table_path: PathBuf,
    /// Documents examined.
    pub documents: usize,
    /// Rows written.
    pub rows: usize,
    /// Documents that produced no row.
    pub skipped: Vec<SkippedDocument>,
}

/// A metadata document the extractor could not turn into a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub file: String,
    pub error: ItemError,
}

// ── Fetch ────────────────────────────────────────────────────────────────

/// Which column of a row an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Pdf,
}

/// Why an asset was not downloaded although nothing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The target file already exists.
    AlreadyPresent,
    /// An earlier row in this window carries the same id.
    DuplicateId,
}

/// Final state of one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Downloaded { path: PathBuf },
    Skipped { reason: SkipReason },
    Failed { error: ItemError },
}

/// Outcome for one asset of one table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    /// 0-based row index in the full table (not in the window).
    pub index: usize,
    pub id: String,
    pub kind: AssetKind,
    pub url: String,
    pub status: OutcomeStatus,
    pub duration_ms: u64,
}

impl RowOutcome {
    pub fn is_downloaded(&self) -> bool {
        matches!(self.status, OutcomeStatus::Downloaded { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, OutcomeStatus::Skipped { .. })
    }

    pub fn error(&self) -> Option<&ItemError> {
        match &self.status {
            OutcomeStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Summary of one [`crate::fetch`] run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchSummary {
    /// Rows in the whole table.
    pub table_rows: usize,
    /// First row index of the window.
    pub offset: usize,
    /// Rows actually selected (`min(offset + limit, M) - offset`).
    pub selected_rows: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Per-asset outcomes ordered by row index, image before PDF.
    pub outcomes: Vec<RowOutcome>,
    /// Table rows restricted to the assets that failed; feed them back to
    /// `fetch` via [`FetchSummary::write_retry_table`].
    pub retry_rows: Vec<AssetRow>,
    /// Manifest of downloaded images, if one was requested.
    pub manifest_path: Option<PathBuf>,
    /// Manifest of downloaded PDFs, if one was requested.
    pub pdf_manifest_path: Option<PathBuf>,
    pub duration_ms: u64,
}

impl FetchSummary {
    /// Outcomes that failed, in row order.
    pub fn failures(&self) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes.iter().filter(|o| o.error().is_some())
    }

    /// Distinct ids with at least one failed asset, in row order.
    pub fn failed_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for o in self.failures() {
            if ids.last() != Some(&o.id.as_str()) {
                ids.push(&o.id);
            }
        }
        ids
    }

    /// Write [`FetchSummary::retry_rows`] as an asset table.
    pub fn write_retry_table(&self, path: impl AsRef<Path>) -> Result<(), IngestError> {
        table::write_table(path.as_ref(), &self.retry_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, id: &str, status: OutcomeStatus) -> RowOutcome {
        RowOutcome {
            index,
            id: id.into(),
            kind: AssetKind::Image,
            url: format!("https://example.org/{id}.jpg"),
            status,
            duration_ms: 1,
        }
    }

    #[test]
    fn failed_ids_are_distinct_and_ordered() {
        let summary = FetchSummary {
            outcomes: vec![
                outcome(0, "1", OutcomeStatus::Failed { error: ItemError::MissingUrl }),
                outcome(
                    0,
                    "1",
                    OutcomeStatus::Failed {
                        error: ItemError::NotAPdf { magic: vec![0, 0, 0, 0] },
                    },
                ),
                outcome(
                    1,
                    "2",
                    OutcomeStatus::Downloaded {
                        path: "assets/images/cms-2.tif".into(),
                    },
                ),
                outcome(2, "3", OutcomeStatus::Failed { error: ItemError::MissingUrl }),
            ],
            ..Default::default()
        };
        assert_eq!(summary.failed_ids(), vec!["1", "3"]);
        assert_eq!(summary.failures().count(), 3);
    }

    #[test]
    fn outcome_status_serialises_flat() {
        let o = outcome(
            0,
            "9",
            OutcomeStatus::Skipped {
                reason: SkipReason::AlreadyPresent,
            },
        );
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["status"]["status"], "skipped");
        assert_eq!(json["status"]["reason"], "already_present");
        assert_eq!(json["kind"], "image");
    }
}
