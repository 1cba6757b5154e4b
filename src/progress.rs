//! Progress-callback trait for per-row fetch events.
//!
//! Inject an [`Arc<dyn FetchProgressCallback>`] via
//! [`crate::config::FetchConfigBuilder::progress_callback`] to receive
//! events as the fetcher works through its window of the asset table. The
//! CLI forwards them to a terminal progress bar; a service could forward
//! them to a channel or a database record instead.
//!
//! # Example
//!
//! ```rust
//! use gta_ingest::{FetchConfig, FetchProgressCallback, RowOutcome};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl FetchProgressCallback for CountingCallback {
//!     fn on_row_complete(&self, outcome: &RowOutcome) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { finished: AtomicUsize::new(0) });
//! let config = FetchConfig::builder()
//!     .progress_callback(counter as Arc<dyn FetchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RowOutcome;
use std::sync::Arc;

/// Called by the fetcher as it processes each asset.
///
/// Rows are processed concurrently, so `on_row_start` and `on_row_complete`
/// may be called from several tasks at once. Implementations must protect
/// shared state with `Mutex`/atomics. All methods default to no-ops.
pub trait FetchProgressCallback: Send + Sync {
    /// Called once with the number of assets in the selected window.
    fn on_fetch_start(&self, total_assets: usize) {
        let _ = total_assets;
    }

    /// Called before the first request for an asset.
    fn on_row_start(&self, index: usize, id: &str) {
        let _ = (index, id);
    }

    /// Called when an asset is downloaded, skipped or has failed.
    fn on_row_complete(&self, outcome: &RowOutcome) {
        let _ = outcome;
    }

    /// Called once after every asset has been attempted.
    fn on_fetch_complete(&self, downloaded: usize, skipped: usize, failed: usize) {
        let _ = (downloaded, skipped, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl FetchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FetchConfig`].
pub type ProgressCallback = Arc<dyn FetchProgressCallback>;
