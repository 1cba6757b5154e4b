//! Asset fetch: a window of the asset table → TIFF images and PDFs on disk.
//!
//! ## Why a window?
//!
//! A full table holds tens of thousands of rows and a run over all of them
//! takes hours. The orchestrator splits the work into `[offset, offset +
//! limit)` windows; since every asset file is written create-exclusive and
//! its existence is the completion marker, a window can be re-run after an
//! interruption and only the missing assets are fetched.
//!
//! ## Concurrency
//!
//! Rows are processed through `buffer_unordered(concurrency)`. Each row
//! future runs its own download → convert → persist sequence and returns its
//! outcomes; nothing is shared between rows except the HTTP client and the
//! progress callback. Outcomes are sorted back into table order afterwards.

use crate::atomic::{self, Persisted, Placement};
use crate::config::{FetchConfig, RetryPolicy};
use crate::error::{IngestError, ItemError};
use crate::output::{AssetKind, FetchSummary, OutcomeStatus, RowOutcome, SkipReason};
use crate::pipeline::{convert, download};
use crate::progress::ProgressCallback;
use crate::table::{self, is_safe_id, AssetRow};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fetch the assets of rows `[offset, offset + limit)` of the table at
/// `table_path`. `limit: None` runs to the end of the table.
///
/// # Returns
/// `Ok(FetchSummary)` even when assets failed; check
/// [`FetchSummary::failed`] and [`FetchSummary::retry_rows`].
///
/// # Errors
/// Returns `Err(IngestError)` only for fatal errors:
/// - the table is missing or malformed (`InvalidTable`)
/// - the asset directories cannot be created
/// - the manifest cannot be written
pub async fn fetch(
    table_path: impl AsRef<Path>,
    offset: usize,
    limit: Option<usize>,
    config: &FetchConfig,
) -> Result<FetchSummary, IngestError> {
    let start = Instant::now();
    let table_path = table_path.as_ref();

    // ── Step 1: Read table and pick the window ───────────────────────────
    let rows = table::read_table(table_path)?;
    let window = window(rows.len(), offset, limit);
    info!(
        "Fetching rows {}..{} of {} from {}",
        window.start,
        window.end,
        rows.len(),
        table_path.display()
    );

    // ── Step 2: Prepare destinations ─────────────────────────────────────
    let images_dir = config.images_dir();
    let pdfs_dir = config.pdfs_dir();
    create_dir(&images_dir).await?;
    if config.include_pdfs {
        create_dir(&pdfs_dir).await?;
    }

    // ── Step 3: Plan work, dropping repeated ids ─────────────────────────
    let (tasks, mut outcomes) = plan(&rows, window.clone());
    let total_assets = outcomes.len()
        + tasks
            .iter()
            .map(|t| 1 + usize::from(config.include_pdfs && !t.row.pdf_url.trim().is_empty()))
            .sum::<usize>();
    debug!(
        "{} rows to fetch, {} duplicate ids skipped",
        tasks.len(),
        outcomes.len()
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_fetch_start(total_assets);
        for o in &outcomes {
            cb.on_row_complete(o);
        }
    }

    // ── Step 4: Download concurrently ────────────────────────────────────
    let ctx = RowContext {
        client: download::build_client(config)?,
        images_dir,
        pdfs_dir,
        include_pdfs: config.include_pdfs,
        retry: config.retry.clone(),
        progress: config.progress_callback.clone(),
    };
    let ctx = &ctx;

    let results: Vec<Vec<RowOutcome>> = stream::iter(tasks.into_iter().map(move |task| fetch_row(ctx, task)))
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;

    // ── Step 5: Aggregate ────────────────────────────────────────────────
    outcomes.extend(results.into_iter().flatten());
    outcomes.sort_by_key(|o| (o.index, o.kind));

    let downloaded = outcomes.iter().filter(|o| o.is_downloaded()).count();
    let skipped = outcomes.iter().filter(|o| o.is_skipped()).count();
    let failed = outcomes.iter().filter(|o| o.error().is_some()).count();
    let retry_rows = retry_rows(&rows, &outcomes);

    // ── Step 6: Manifests ────────────────────────────────────────────────
    let (manifest_path, pdf_manifest_path) = match config.manifest_dir {
        Some(ref dir) => {
            let (images, pdfs) = write_manifests(dir, &outcomes, config.include_pdfs)?;
            (Some(images), pdfs)
        }
        None => (None, None),
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_fetch_complete(downloaded, skipped, failed);
    }

    let summary = FetchSummary {
        table_rows: rows.len(),
        offset: window.start,
        selected_rows: window.len(),
        downloaded,
        skipped,
        failed,
        outcomes,
        retry_rows,
        manifest_path,
        pdf_manifest_path,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    info!(
        "Fetch complete: {} downloaded, {} skipped, {} failed in {}ms",
        summary.downloaded, summary.skipped, summary.failed, summary.duration_ms
    );
    Ok(summary)
}

/// Rows `[offset, min(offset + limit, total))`, empty when `offset ≥ total`.
pub fn window(total: usize, offset: usize, limit: Option<usize>) -> Range<usize> {
    let start = offset.min(total);
    let end = match limit {
        Some(limit) => offset.saturating_add(limit).min(total),
        None => total,
    };
    start..end.max(start)
}

/// `cms-<id>.tif` or `cms-<id>.pdf`.
pub fn asset_file_name(id: &str, kind: AssetKind) -> String {
    match kind {
        AssetKind::Image => format!("cms-{id}.tif"),
        AssetKind::Pdf => format!("cms-{id}.pdf"),
    }
}

/// One row scheduled for download.
struct RowTask {
    index: usize,
    row: AssetRow,
}

/// Split the window into tasks and outcomes for repeated ids.
fn plan(rows: &[AssetRow], window: Range<usize>) -> (Vec<RowTask>, Vec<RowOutcome>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut tasks = Vec::with_capacity(window.len());
    let mut duplicates = Vec::new();

    for index in window {
        let row = &rows[index];
        if seen.insert(row.id.as_str()) {
            tasks.push(RowTask {
                index,
                row: row.clone(),
            });
        } else {
            warn!("Row {}: id {} already seen in this window, skipped", index, row.id);
            duplicates.push(RowOutcome {
                index,
                id: row.id.clone(),
                kind: AssetKind::Image,
                url: row.image_url.clone(),
                status: OutcomeStatus::Skipped {
                    reason: SkipReason::DuplicateId,
                },
                duration_ms: 0,
            });
        }
    }
    (tasks, duplicates)
}

/// Shared by all row futures.
struct RowContext {
    client: Client,
    images_dir: PathBuf,
    pdfs_dir: PathBuf,
    include_pdfs: bool,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl RowContext {
    fn target(&self, id: &str, kind: AssetKind) -> PathBuf {
        let dir = match kind {
            AssetKind::Image => &self.images_dir,
            AssetKind::Pdf => &self.pdfs_dir,
        };
        dir.join(asset_file_name(id, kind))
    }
}

/// Image first, then the PDF when the row has one.
async fn fetch_row(ctx: &RowContext, task: RowTask) -> Vec<RowOutcome> {
    let mut out = Vec::with_capacity(2);
    out.push(fetch_asset(ctx, &task, AssetKind::Image, &task.row.image_url).await);
    if ctx.include_pdfs && !task.row.pdf_url.trim().is_empty() {
        out.push(fetch_asset(ctx, &task, AssetKind::Pdf, &task.row.pdf_url).await);
    }
    out
}

async fn fetch_asset(ctx: &RowContext, task: &RowTask, kind: AssetKind, url: &str) -> RowOutcome {
    let started = Instant::now();
    let id = task.row.id.as_str();
    if let Some(ref cb) = ctx.progress {
        cb.on_row_start(task.index, id);
    }

    let status = asset_status(ctx, id, kind, url.trim()).await;
    match &status {
        OutcomeStatus::Downloaded { path } => debug!("Row {}: wrote {}", task.index, path.display()),
        OutcomeStatus::Skipped { reason } => debug!("Row {}: {:?} skipped ({:?})", task.index, kind, reason),
        OutcomeStatus::Failed { error } => {
            warn!("Row {} (id {}): {:?} failed: {}", task.index, id, kind, error)
        }
    }

    let outcome = RowOutcome {
        index: task.index,
        id: id.to_string(),
        kind,
        url: url.to_string(),
        status,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    if let Some(ref cb) = ctx.progress {
        cb.on_row_complete(&outcome);
    }
    outcome
}

async fn asset_status(ctx: &RowContext, id: &str, kind: AssetKind, url: &str) -> OutcomeStatus {
    let failed = |error: ItemError| OutcomeStatus::Failed { error };

    if !is_safe_id(id) {
        return failed(ItemError::InvalidId { id: id.to_string() });
    }
    let target = ctx.target(id, kind);
    if target_exists(&target).await {
        return OutcomeStatus::Skipped {
            reason: SkipReason::AlreadyPresent,
        };
    }
    if url.is_empty() {
        return failed(ItemError::MissingUrl);
    }
    if kind == AssetKind::Image && !download::has_accepted_extension(url) {
        return failed(ItemError::UnsupportedExtension { url: url.to_string() });
    }

    let bytes = match download::download(&ctx.client, url, kind, &ctx.retry).await {
        Ok(bytes) => bytes,
        Err(e) => return failed(e),
    };
    let persisted = match kind {
        AssetKind::Image => convert::to_tiff(bytes, target.clone()).await,
        AssetKind::Pdf => convert::store_pdf(bytes, target.clone()).await,
    };
    match persisted {
        Ok(Persisted::Written) => OutcomeStatus::Downloaded { path: target },
        // Another worker or run got there first.
        Ok(Persisted::AlreadyExists) => OutcomeStatus::Skipped {
            reason: SkipReason::AlreadyPresent,
        },
        Err(e) => failed(e),
    }
}

/// Whether the asset is already on disk. A failed check counts as absent;
/// the no-clobber persist still guards the target.
async fn target_exists(target: &Path) -> bool {
    match tokio::fs::try_exists(target).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Cannot check {}: {}; fetching anyway", target.display(), e);
            false
        }
    }
}

/// Table rows of the failed assets. The PDF column is blanked unless the
/// PDF itself failed; an image that already exists is skipped on retry.
fn retry_rows(rows: &[AssetRow], outcomes: &[RowOutcome]) -> Vec<AssetRow> {
    // row index → PDF failed
    let mut failed: BTreeMap<usize, bool> = BTreeMap::new();
    for o in outcomes.iter().filter(|o| o.error().is_some()) {
        *failed.entry(o.index).or_default() |= o.kind == AssetKind::Pdf;
    }

    failed
        .into_iter()
        .filter_map(|(index, pdf_failed)| {
            let mut row = rows.get(index)?.clone();
            if !pdf_failed {
                row.pdf_url.clear();
            }
            Some(row)
        })
        .collect()
}

/// Write `to_db_<timestamp>.csv` (and `to_db_pdf_<timestamp>.csv`) listing
/// `file name,path` of every downloaded asset.
fn write_manifests(
    dir: &Path,
    outcomes: &[RowOutcome],
    include_pdfs: bool,
) -> Result<(PathBuf, Option<PathBuf>), IngestError> {
    std::fs::create_dir_all(dir).map_err(|e| IngestError::fs(dir, e))?;
    let stamp = Utc::now().format("%Y_%m_%d__%H_%M_%S").to_string();

    let images = dir.join(format!("to_db_{stamp}.csv"));
    write_manifest(&images, outcomes, AssetKind::Image)?;

    let pdfs = if include_pdfs {
        let path = dir.join(format!("to_db_pdf_{stamp}.csv"));
        write_manifest(&path, outcomes, AssetKind::Pdf)?;
        Some(path)
    } else {
        None
    };
    Ok((images, pdfs))
}

fn write_manifest(path: &Path, outcomes: &[RowOutcome], kind: AssetKind) -> Result<(), IngestError> {
    let csv_err = |e: csv::Error| IngestError::Internal(format!("writing manifest {}: {e}", path.display()));

    let mut tmp = atomic::temp_for(path).map_err(|e| IngestError::fs(path, e))?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file_mut());
        for o in outcomes.iter().filter(|o| o.kind == kind) {
            if let OutcomeStatus::Downloaded { path: file } = &o.status {
                writer
                    .write_record([asset_file_name(&o.id, kind), file.display().to_string()])
                    .map_err(csv_err)?;
            }
        }
        writer.flush().map_err(|e| IngestError::fs(path, e))?;
    }
    atomic::persist(tmp, path, Placement::Replace).map_err(|e| IngestError::fs(path, e))?;
    info!("Manifest written to {}", path.display());
    Ok(())
}

async fn create_dir(dir: &Path) -> Result<(), IngestError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| IngestError::fs(dir, e))
}
