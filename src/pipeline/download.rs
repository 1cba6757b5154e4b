//! Asset download: one URL → bytes in memory, through the retry wrapper.
//!
//! A `200 OK` is not enough. The asset host answers throttled or half-broken
//! requests with an HTML error page and a success status, so the
//! `Content-Type` is checked too and a mismatch is treated like a transient
//! failure. PDFs additionally have their `%PDF` magic checked once the body
//! is in.

use crate::config::{FetchConfig, RetryPolicy};
use crate::easydb::check_status;
use crate::error::{IngestError, ItemError, TransferError};
use crate::output::AssetKind;
use crate::retry::with_retry;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// File extensions the image column may point at.
pub const ACCEPTED_IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif", "heic", "heif", "webp",
];

/// Build the shared HTTP client for asset downloads.
pub fn build_client(config: &FetchConfig) -> Result<Client, IngestError> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| IngestError::Internal(format!("building HTTP client: {e}")))
}

/// Lower-cased extension of the URL path, ignoring query and fragment.
pub fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Whether `url` names an image type the converter accepts.
pub fn has_accepted_extension(url: &str) -> bool {
    url_extension(url).is_some_and(|ext| ACCEPTED_IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Download `url`, retrying transient failures.
pub async fn download(
    client: &Client,
    url: &str,
    kind: AssetKind,
    retry: &RetryPolicy,
) -> Result<Vec<u8>, ItemError> {
    let bytes = with_retry(retry, url, move || async move {
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| TransferError::from_reqwest(&e))?;
        let resp = check_status(resp)?;
        check_content_type(resp.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()), kind)?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransferError::Body(e.to_string()))?;
        Ok(body.to_vec())
    })
    .await
    .map_err(|e| ItemError::from_transfer(url, e, retry.attempts()))?;

    debug!("Downloaded {} bytes from {}", bytes.len(), url);

    if kind == AssetKind::Pdf {
        check_pdf_magic(&bytes)?;
    }
    Ok(bytes)
}

/// A missing header passes; the decoder has the last word.
fn check_content_type(content_type: Option<&str>, kind: AssetKind) -> Result<(), TransferError> {
    let Some(ct) = content_type else {
        return Ok(());
    };
    let lower = ct.to_ascii_lowercase();
    let ok = match kind {
        AssetKind::Image => lower.starts_with("image/"),
        AssetKind::Pdf => lower.contains("pdf") || lower.starts_with("application/octet-stream"),
    };
    if ok {
        Ok(())
    } else {
        Err(TransferError::UnexpectedContent {
            content_type: ct.to_string(),
            expected: match kind {
                AssetKind::Image => "image/*",
                AssetKind::Pdf => "application/pdf",
            },
        })
    }
}

fn check_pdf_magic(bytes: &[u8]) -> Result<(), ItemError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(());
    }
    Err(ItemError::NotAPdf {
        magic: bytes.iter().take(4).copied().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_ignores_query_and_case() {
        assert_eq!(url_extension("https://h/a/b.JPG?version=original").as_deref(), Some("jpg"));
        assert_eq!(url_extension("https://h/a/b.tar.gz#x").as_deref(), Some("gz"));
        assert_eq!(url_extension("https://h/a/b"), None);
        assert_eq!(url_extension("https://h/a.d/b"), None);
    }

    #[test]
    fn accepted_extensions() {
        for url in [
            "https://h/a.png",
            "https://h/a.jpeg",
            "https://h/a.TIFF",
            "https://h/a.heic?x=1",
            "https://h/a.webp",
        ] {
            assert!(has_accepted_extension(url), "{url}");
        }
        for url in ["https://h/a.pdf", "https://h/a.svg", "https://h/a", ""] {
            assert!(!has_accepted_extension(url), "{url}");
        }
    }

    #[test]
    fn content_type_checks() {
        assert!(check_content_type(Some("image/jpeg"), AssetKind::Image).is_ok());
        assert!(check_content_type(Some("IMAGE/PNG; charset=binary"), AssetKind::Image).is_ok());
        assert!(check_content_type(None, AssetKind::Image).is_ok());
        assert!(matches!(
            check_content_type(Some("text/html"), AssetKind::Image),
            Err(TransferError::UnexpectedContent { .. })
        ));
        assert!(check_content_type(Some("application/pdf"), AssetKind::Pdf).is_ok());
        assert!(check_content_type(Some("application/octet-stream"), AssetKind::Pdf).is_ok());
        assert!(check_content_type(Some("text/html"), AssetKind::Pdf).is_err());
    }

    #[test]
    fn pdf_magic() {
        assert!(check_pdf_magic(b"%PDF-1.7\n...").is_ok());
        assert_eq!(
            check_pdf_magic(b"<html>"),
            Err(ItemError::NotAPdf {
                magic: b"<htm".to_vec()
            })
        );
        assert_eq!(check_pdf_magic(b""), Err(ItemError::NotAPdf { magic: vec![] }));
    }
}
