//! # gta-ingest
//!
//! Ingest digital objects from an EasyDB collection into an image server's
//! asset tree.
//!
//! ## Pipeline Overview
//!
//! Three stages, chained by an external orchestrator through the files they
//! write. None of them reads another's internal state.
//!
//! ```text
//! EasyDB API
//!  │
//!  ├─ 1. Harvest  session + paged listing → <base>/<module>/item-<id>.xml
//!  ├─ 2. Extract  XML documents           → id_url_table.csv
//!  └─ 3. Fetch    table window [offset, offset+limit)
//!                 → assets/images/cms-<id>.tif, assets/pdfs/cms-<id>.pdf
//! ```
//!
//! Every output file is written to a temp file and renamed into place, and
//! assets are renamed create-exclusive. An interrupted run leaves complete
//! files or nothing; re-running any stage only does the missing work.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gta_ingest::{extract, fetch, ExtractConfig, FetchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let report = extract("data/digital_object", "data", &ExtractConfig::default()).await?;
//!     let config = FetchConfig::builder().assets_dir("assets").concurrency(8).build()?;
//!     let summary = fetch(&report.table_path, 0, Some(500), &config).await?;
//!     eprintln!(
//!         "{} downloaded, {} skipped, {} failed",
//!         summary.downloaded, summary.skipped, summary.failed
//!     );
//!     summary.write_retry_table("data/retry.csv")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `gta-ingest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `heif`  | off     | Decodes HEIF/HEIC assets through libheif |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! gta-ingest = { version = "0.5", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod atomic;
pub mod config;
pub mod easydb;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod harvest;
pub mod module;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod sync_state;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Credentials, ExtractConfig, FetchConfig, FetchConfigBuilder, HarvestConfig, HarvestConfigBuilder, HarvestMode,
    RetryPolicy, DEFAULT_SERVER, TABLE_FILE_NAME,
};
pub use error::{IngestError, ItemError, TransferError};
pub use extract::extract;
pub use fetch::fetch;
pub use harvest::{harvest, HarvestRequest, DEFAULT_FILENAME_PREFIX};
pub use module::Module;
pub use output::{
    AssetKind, ExtractReport, FailedItem, FetchSummary, HarvestReport, OutcomeStatus, RowOutcome, SkipReason,
    SkippedDocument,
};
pub use progress::{FetchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use table::{read_table, write_table, AssetRow};
