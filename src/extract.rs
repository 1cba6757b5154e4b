//! Table extraction: harvested XML documents → `id_url_table.csv`.
//!
//! Documents are visited in file-name order and every accepted document
//! becomes one row, so the same folder always yields a byte-identical
//! table. That matters because the fetcher addresses rows by offset.

use crate::config::ExtractConfig;
use crate::error::{IngestError, ItemError};
use crate::output::{ExtractReport, SkippedDocument};
use crate::pipeline::metadata;
use crate::table::{self, AssetRow};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Build the asset table for every `*.xml` directly inside `input_folder`.
///
/// Runs on the blocking pool; parsing thousands of documents is file I/O
/// and CPU work only.
///
/// # Errors
/// `FolderNotFound` when the input folder is missing, `Filesystem` when a
/// document cannot be read or the table cannot be written. Documents that
/// fail to parse are reported in [`ExtractReport::skipped`].
pub async fn extract(
    input_folder: impl AsRef<Path>,
    output_folder: impl AsRef<Path>,
    config: &ExtractConfig,
) -> Result<ExtractReport, IngestError> {
    let input = input_folder.as_ref().to_path_buf();
    let output = output_folder.as_ref().to_path_buf();
    let config = config.clone();

    tokio::task::spawn_blocking(move || extract_blocking(&input, &output, &config))
        .await
        .map_err(|e| IngestError::Internal(format!("extract task panicked: {e}")))?
}

/// Blocking implementation of [`extract`].
pub fn extract_blocking(
    input_folder: &Path,
    output_folder: &Path,
    config: &ExtractConfig,
) -> Result<ExtractReport, IngestError> {
    let files = list_documents(input_folder)?;
    info!(
        "Extracting <{}> assets from {} documents in {}",
        config.objecttype,
        files.len(),
        input_folder.display()
    );

    let mut rows: Vec<AssetRow> = Vec::with_capacity(files.len());
    let mut seen: HashSet<String> = HashSet::new();
    let mut skipped: Vec<SkippedDocument> = Vec::new();

    for path in &files {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = std::fs::read(path).map_err(|e| IngestError::fs(path, e))?;

        let assets = match metadata::parse_document(&bytes, &config.objecttype, &config.asset_element) {
            Ok(assets) => assets,
            Err(e) => {
                warn!("Skipping {}: {}", file, e);
                skipped.push(SkippedDocument {
                    error: ItemError::MalformedMetadata {
                        file: file.clone(),
                        detail: e.to_string(),
                    },
                    file,
                });
                continue;
            }
        };

        if !seen.insert(assets.id.clone()) {
            warn!("Skipping {}: id {} already extracted", file, assets.id);
            skipped.push(SkippedDocument {
                file,
                error: ItemError::DuplicateId { id: assets.id },
            });
            continue;
        }

        debug!("{} → id {}", file, assets.id);
        rows.push(AssetRow {
            id: assets.id,
            image_url: assets.image_url,
            filename: file,
            pdf_url: assets.pdf_url.unwrap_or_default(),
        });
    }

    let table_path = output_folder.join(&config.table_name);
    table::write_table(&table_path, &rows)?;

    info!(
        "Wrote {} rows to {} ({} documents skipped)",
        rows.len(),
        table_path.display(),
        skipped.len()
    );

    Ok(ExtractReport {
        table_path,
        documents: files.len(),
        rows: rows.len(),
        skipped,
    })
}

/// `*.xml` regular files directly inside `folder`, sorted by name.
fn list_documents(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::FolderNotFound {
            path: folder.to_path_buf(),
        });
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(|e| IngestError::fs(folder, e))? {
        let entry = entry.map_err(|e| IngestError::fs(folder, e))?;
        let path = entry.path();
        let is_xml = path.extension().is_some_and(|ext| ext == "xml");
        if is_xml && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
