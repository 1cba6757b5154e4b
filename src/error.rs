//! Error types for the gta-ingest library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`IngestError`]: **Fatal**: the stage cannot proceed at all (bad
//!   credentials, unreachable API, unreadable table, disk failure). Returned
//!   as `Err(IngestError)` from [`crate::harvest`], [`crate::extract`] and
//!   [`crate::fetch`].
//!
//! * [`ItemError`]: **Non-fatal**: one metadata document or one asset
//!   failed but every other item is fine. Stored inside
//!   [`crate::output::RowOutcome`] and [`crate::output::HarvestReport`] so
//!   operators can target a retry pass at exactly the failed ids.
//!
//! * [`TransferError`]: a single HTTP exchange failed. It is the error type
//!   the shared retry wrapper ([`crate::retry::with_retry`]) classifies as
//!   transient or permanent before it is downgraded to one of the above.

use crate::retry::IsRetryable;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the gta-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Remote API errors ─────────────────────────────────────────────────
    /// The API rejected the login/password pair.
    #[error("Authentication failed for '{login}' (HTTP {status}): {detail}\nCheck --login and --password.")]
    AuthenticationFailed {
        login: String,
        status: u16,
        detail: String,
    },

    /// A session or listing request failed after all retries.
    #[error("Request to '{url}' failed: {source}")]
    Remote {
        url: String,
        #[source]
        source: TransferError,
    },

    /// The API answered with a body we could not interpret.
    #[error("Unexpected response from '{url}': {detail}")]
    UnexpectedResponse { url: String, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The module name is not part of the module registry.
    #[error("Unknown module '{name}'. Known modules: {known}")]
    UnknownModule { name: String, known: String },

    /// The asset table is missing or malformed.
    #[error("Invalid asset table '{path}': {detail}")]
    InvalidTable { path: PathBuf, detail: String },

    /// The input folder of the extractor does not exist or is not a directory.
    #[error("Input folder not found: '{path}'")]
    FolderNotFound { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A file or directory could not be created, read or written.
    #[error("File system error at '{path}': {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Failure of one HTTP exchange.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// The request timed out.
    #[error("timed out")]
    Timeout,

    /// The connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// The server answered 200 but with the wrong kind of payload.
    #[error("unexpected content type '{content_type}' (expected {expected})")]
    UnexpectedContent {
        content_type: String,
        expected: &'static str,
    },

    /// The body could not be read.
    #[error("failed to read body: {0}")]
    Body(String),

    /// Anything else reqwest reports (bad URL, TLS, redirect loop).
    #[error("{0}")]
    Other(String),
}

impl TransferError {
    /// Classify a reqwest error.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            TransferError::Timeout
        } else if e.is_connect() {
            TransferError::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            TransferError::Body(e.to_string())
        } else if let Some(status) = e.status() {
            TransferError::Status {
                status: status.as_u16(),
                retry_after: None,
            }
        } else if e.is_request() {
            // Connection resets surface as request errors without a status.
            TransferError::Connect(e.to_string())
        } else {
            TransferError::Other(e.to_string())
        }
    }
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Timeout | TransferError::Connect(_) | TransferError::Body(_) => true,
            // Rate limits and server-side failures are transient; other 4xx are not.
            TransferError::Status { status, .. } => *status == 429 || *status >= 500,
            TransferError::UnexpectedContent { .. } => true,
            TransferError::Other(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransferError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A non-fatal error for a single metadata document or asset.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemError {
    /// Permanent HTTP failure (4xx other than 429).
    #[error("HTTP {status} for '{url}'")]
    HttpStatus { url: String, status: u16 },

    /// Transient failure that survived every retry.
    #[error("gave up on '{url}' after {attempts} attempts: {detail}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        detail: String,
    },

    /// Any other transport failure.
    #[error("download of '{url}' failed: {detail}")]
    Transfer { url: String, detail: String },

    /// The row has no URL for this asset.
    #[error("no download URL")]
    MissingUrl,

    /// The URL does not end in an accepted image extension.
    #[error("'{url}' is not an accepted image type")]
    UnsupportedExtension { url: String },

    /// The bytes are an image format this build cannot decode.
    #[error("unsupported image format: {detail}")]
    UnsupportedFormat { detail: String },

    /// The bytes could not be decoded as an image.
    #[error("undecodable asset: {detail}")]
    Undecodable { detail: String },

    /// The downloaded file is not a PDF.
    #[error("not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The row id cannot be turned into a safe file name.
    #[error("id '{id}' is not a valid file name")]
    InvalidId { id: String },

    /// An earlier document already produced a row for this id.
    #[error("id '{id}' already taken by an earlier document")]
    DuplicateId { id: String },

    /// A metadata document could not be parsed or lacks a required field.
    #[error("malformed metadata in '{file}': {detail}")]
    MalformedMetadata { file: String, detail: String },

    /// Writing this item's output failed.
    #[error("failed to write '{path}': {detail}")]
    Write { path: String, detail: String },
}

impl ItemError {
    /// Downgrade a transport error that escaped the retry wrapper.
    pub fn from_transfer(url: &str, err: TransferError, attempts: u32) -> Self {
        match err {
            TransferError::Status { status, .. } if !(status == 429 || status >= 500) => {
                ItemError::HttpStatus {
                    url: url.to_string(),
                    status,
                }
            }
            e if e.is_retryable() => ItemError::RetriesExhausted {
                url: url.to_string(),
                attempts,
                detail: e.to_string(),
            },
            e => ItemError::Transfer {
                url: url.to_string(),
                detail: e.to_string(),
            },
        }
    }
}
