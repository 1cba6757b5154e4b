//! The asset table: the CSV hand-off between extractor and fetcher.
//!
//! Header: `_id,image_url,filename,pdf_url`. Row order is significant
//! because the fetcher addresses rows by offset.

use crate::atomic::{self, Placement};
use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Column names, in file order.
pub const HEADER: [&str; 4] = ["_id", "image_url", "filename", "pdf_url"];

/// One row of the asset table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRow {
    /// Item id; older tables call this column `_system_object_id`.
    #[serde(rename = "_id", alias = "_system_object_id")]
    pub id: String,
    /// Download URL of the original image version.
    pub image_url: String,
    /// Metadata document the row came from.
    #[serde(default)]
    pub filename: String,
    /// Download URL of the original PDF version, empty when there is none.
    #[serde(default)]
    pub pdf_url: String,
}

impl AssetRow {
    pub fn new(id: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image_url: image_url.into(),
            filename: String::new(),
            pdf_url: String::new(),
        }
    }
}

/// Whether `id` can be embedded in a file name as is.
///
/// EasyDB ids are numeric; letters, `-` and `_` are tolerated for other
/// sources. Anything that could leave the target directory is rejected.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Read every row of a table.
///
/// A malformed row is fatal: skipping it would shift every later offset.
pub fn read_table(path: &Path) -> Result<Vec<AssetRow>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| invalid(path, e))?;

    reader
        .deserialize::<AssetRow>()
        .map(|r| r.map_err(|e| invalid(path, e)))
        .collect()
}

/// Write rows atomically, replacing any previous table.
pub fn write_table(path: &Path, rows: &[AssetRow]) -> Result<(), IngestError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| IngestError::fs(parent, e))?;
    }

    let mut tmp = atomic::temp_for(path).map_err(|e| IngestError::fs(path, e))?;
    {
        // Header written by hand so an empty table still has one.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file_mut());
        writer.write_record(HEADER).map_err(|e| invalid(path, e))?;
        for row in rows {
            writer.serialize(row).map_err(|e| invalid(path, e))?;
        }
        writer.flush().map_err(|e| IngestError::fs(path, e))?;
    }
    atomic::persist(tmp, path, Placement::Replace).map_err(|e| IngestError::fs(path, e))?;
    Ok(())
}

fn invalid(path: &Path, e: csv::Error) -> IngestError {
    if let csv::ErrorKind::Io(_) = e.kind() {
        if !path.exists() {
            return IngestError::InvalidTable {
                path: path.to_path_buf(),
                detail: "file not found".into(),
            };
        }
    }
    IngestError::InvalidTable {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_url_table.csv");
        let rows = vec![
            AssetRow::new("3", "https://example.org/c.jpg"),
            AssetRow::new("1", "https://example.org/a.jpg"),
            AssetRow::new("2", "https://example.org/b.jpg"),
        ];
        write_table(&path, &rows).unwrap();
        assert_eq!(read_table(&path).unwrap(), rows);
    }

    #[test]
    fn empty_table_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        write_table(&path, &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "_id,image_url,filename,pdf_url\n");
        assert!(read_table(&path).unwrap().is_empty());
    }

    #[test]
    fn legacy_id_column_and_missing_pdf_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        std::fs::write(
            &path,
            "_system_object_id,image_url,filename\n42,https://example.org/x.png,item-42.xml\n",
        )
        .unwrap();
        let rows = read_table(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "42");
        assert_eq!(rows[0].filename, "item-42.xml");
        assert!(rows[0].pdf_url.is_empty());
    }

    #[test]
    fn safe_ids() {
        assert!(is_safe_id("12345"));
        assert!(is_safe_id("obj_7-b"));
        assert!(!is_safe_id(""));
        assert!(!is_safe_id("../etc"));
        assert!(!is_safe_id("a/b"));
        assert!(!is_safe_id("1 2"));
    }

    #[test]
    fn missing_file_is_invalid_table() {
        let err = read_table(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, IngestError::InvalidTable { .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn ragged_row_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "_id,image_url,filename,pdf_url\n1,https://a/b.jpg\n").unwrap();
        assert!(matches!(
            read_table(&path),
            Err(IngestError::InvalidTable { .. })
        ));
    }
}
