//! Metadata harvest: mirror one module's remote items as XML documents.
//!
//! The listing is paged; each page is handed to a selector that decides
//! which items to fetch and how to place them:
//!
//! | Mode     | Selector          | Fetches                        | Placement   |
//! |----------|-------------------|--------------------------------|-------------|
//! | `full`   | [`select_full`]   | every listed item              | replace     |
//! | `sample` | [`select_full`]   | every item of the sample pools | replace     |
//! | `update` | [`select_update`] | items without a local document | no-clobber  |
//!
//! The selector is picked once per run; both share the same fetch-and-write
//! step. A document whose file name already exists when an update-mode
//! write lands is counted as skipped, never overwritten.

use crate::atomic::{self, Persisted, Placement};
use crate::config::{Credentials, HarvestConfig, HarvestMode};
use crate::easydb::{EasydbClient, RemoteItem};
use crate::error::{IngestError, ItemError};
use crate::module::Module;
use crate::output::{FailedItem, HarvestReport};
use crate::pipeline::document;
use crate::sync_state::SyncState;
use crate::table::is_safe_id;
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name prefix of harvested documents unless the caller picks another.
pub const DEFAULT_FILENAME_PREFIX: &str = "item-";

/// What to harvest and where to put it.
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    /// Module name, see [`Module::names`].
    pub module: String,
    pub mode: HarvestMode,
    pub credentials: Credentials,
    /// Documents go to `<base_folder>/<module>/`.
    pub base_folder: PathBuf,
    pub filename_prefix: String,
}

impl HarvestRequest {
    /// A request in update mode with the default file name prefix.
    pub fn new(module: impl Into<String>, credentials: Credentials, base_folder: impl Into<PathBuf>) -> Self {
        Self {
            module: module.into(),
            mode: HarvestMode::default(),
            credentials,
            base_folder: base_folder.into(),
            filename_prefix: DEFAULT_FILENAME_PREFIX.to_string(),
        }
    }

    pub fn with_mode(mut self, mode: HarvestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }
}

/// What exists locally for one module.
#[derive(Debug, Clone, Default)]
pub struct LocalState {
    prefix: String,
    present: HashSet<String>,
    sync: SyncState,
    compare_timestamps: bool,
}

impl LocalState {
    /// List the documents already in `module_dir` and load its sync state.
    pub fn scan(module_dir: &Path, prefix: &str, compare_timestamps: bool) -> Result<Self, IngestError> {
        let mut present = HashSet::new();
        for entry in std::fs::read_dir(module_dir).map_err(|e| IngestError::fs(module_dir, e))? {
            let entry = entry.map_err(|e| IngestError::fs(module_dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) && name.ends_with(".xml") {
                    present.insert(name.to_string());
                }
            }
        }
        debug!("{} local documents in {}", present.len(), module_dir.display());

        Ok(Self {
            prefix: prefix.to_string(),
            present,
            sync: SyncState::load(module_dir),
            compare_timestamps,
        })
    }

    /// `<prefix><id>.xml`
    pub fn file_name(&self, id: &str) -> String {
        format!("{}{}.xml", self.prefix, id)
    }

    pub fn has_document(&self, id: &str) -> bool {
        self.present.contains(&self.file_name(id))
    }

    fn mark_written(&mut self, file_name: &str, last_modified: Option<&str>) {
        self.present.insert(file_name.to_string());
        self.sync.record(file_name, last_modified);
    }
}

/// One listed item chosen for fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub item: &'a RemoteItem,
    pub placement: Placement,
}

/// Picks the items of one listing page to fetch.
pub type Selector = for<'a> fn(&'a [RemoteItem], &LocalState) -> Vec<Selection<'a>>;

/// Every item, overwriting local copies.
pub fn select_full<'a>(items: &'a [RemoteItem], _local: &LocalState) -> Vec<Selection<'a>> {
    items
        .iter()
        .map(|item| Selection {
            item,
            placement: Placement::Replace,
        })
        .collect()
}

/// Items without a local document, plus stale ones when timestamps are compared.
pub fn select_update<'a>(items: &'a [RemoteItem], local: &LocalState) -> Vec<Selection<'a>> {
    items
        .iter()
        .filter_map(|item| {
            let name = local.file_name(&item.id);
            if !local.present.contains(&name) {
                Some(Selection {
                    item,
                    placement: Placement::NoClobber,
                })
            } else if local.compare_timestamps
                && local.sync.is_stale(&name, item.last_modified.as_deref())
            {
                Some(Selection {
                    item,
                    placement: Placement::Replace,
                })
            } else {
                None
            }
        })
        .collect()
}

fn selector_for(mode: HarvestMode) -> Selector {
    match mode {
        HarvestMode::Full | HarvestMode::Sample => select_full,
        HarvestMode::Update => select_update,
    }
}

/// Harvest one module.
///
/// Opens an authenticated session, walks the listing page by page and
/// writes the selected documents to `<base_folder>/<module>/`.
///
/// # Errors
/// Returns `Err(IngestError)` only when the run cannot continue: unknown
/// module, failed login, a listing page that fails after all retries, or a
/// file system error. A document that cannot be fetched is recorded in
/// [`HarvestReport::failed`] and the run goes on.
pub async fn harvest(request: &HarvestRequest, config: &HarvestConfig) -> Result<HarvestReport, IngestError> {
    let start = Instant::now();
    let module = Module::lookup(&request.module)?;
    if request.filename_prefix.contains(['/', '\\']) {
        return Err(IngestError::InvalidConfig(format!(
            "filename prefix must not contain path separators: '{}'",
            request.filename_prefix
        )));
    }

    let module_dir = request.base_folder.join(module.name);
    tokio::fs::create_dir_all(&module_dir)
        .await
        .map_err(|e| IngestError::fs(&module_dir, e))?;
    info!(
        "Harvesting module '{}' ({}) in {} mode into {}",
        module.name,
        module.objecttype,
        request.mode,
        module_dir.display()
    );

    let mut local = LocalState::scan(&module_dir, &request.filename_prefix, config.compare_timestamps)?;
    let select = selector_for(request.mode);
    let started_at = Utc::now();

    let mut client = EasydbClient::new(config)?;
    client.start_session().await?;
    client.authenticate(&request.credentials).await?;

    let result = harvest_pages(
        &client,
        &module,
        request.mode == HarvestMode::Sample,
        select,
        &module_dir,
        &mut local,
        config.page_size,
    )
    .await;

    if let Err(e) = client.deauthenticate().await {
        warn!("Closing the session failed: {}", e);
    }

    let mut report = match result {
        Ok(report) => report,
        Err(e) => {
            // Keep the per-file records of what did get written.
            if let Err(save_err) = local.sync.save(&module_dir) {
                warn!("Could not save sync state: {}", save_err);
            }
            return Err(e);
        }
    };

    local.sync.last_updated = Some(started_at);
    local.sync.save(&module_dir)?;

    report.module = module.name.to_string();
    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Harvest of '{}' complete: {} listed, {} written, {} skipped, {} failed in {}ms",
        report.module,
        report.listed,
        report.written,
        report.skipped,
        report.failed.len(),
        report.duration_ms
    );
    Ok(report)
}

async fn harvest_pages(
    client: &EasydbClient,
    module: &Module,
    sample: bool,
    select: Selector,
    module_dir: &Path,
    local: &mut LocalState,
    page_size: usize,
) -> Result<HarvestReport, IngestError> {
    let mut report = HarvestReport::default();
    let mut offset = 0usize;

    loop {
        let page = client.list_page(module, sample, offset, page_size).await?;
        if page.returned == 0 {
            break;
        }
        debug!(
            "Listing page at offset {}: {} items of {}",
            offset, page.returned, page.count
        );
        report.listed += page.items.len();

        let selected = select(&page.items, local);
        report.skipped += page.items.len() - selected.len();

        for sel in selected {
            let file_name = local.file_name(&sel.item.id);
            match store_item(client, module, module_dir, &file_name, sel).await? {
                Ok(Persisted::Written) => {
                    report.written += 1;
                    local.mark_written(&file_name, sel.item.last_modified.as_deref());
                }
                Ok(Persisted::AlreadyExists) => {
                    debug!("{} appeared concurrently, left as is", file_name);
                    report.skipped += 1;
                    local.present.insert(file_name);
                }
                Err(error) => {
                    warn!("Item {} failed: {}", sel.item.id, error);
                    report.failed.push(FailedItem {
                        id: sel.item.id.clone(),
                        error,
                    });
                }
            }
        }

        offset += page.returned;
        if offset >= page.count {
            break;
        }
    }
    Ok(report)
}

/// Fetch one document and write it. The outer error is fatal, the inner one
/// belongs to the item.
async fn store_item(
    client: &EasydbClient,
    module: &Module,
    module_dir: &Path,
    file_name: &str,
    sel: Selection<'_>,
) -> Result<Result<Persisted, ItemError>, IngestError> {
    let id = &sel.item.id;
    if !is_safe_id(id) {
        return Ok(Err(ItemError::InvalidId { id: id.clone() }));
    }

    let raw = match client.fetch_document(module.objecttype, id).await {
        Ok(raw) => raw,
        Err(e) => return Ok(Err(e)),
    };
    let doc = document::normalize(&raw);
    if let Err(detail) = document::check_well_formed(&doc) {
        return Ok(Err(ItemError::MalformedMetadata {
            file: file_name.to_string(),
            detail,
        }));
    }

    let target = module_dir.join(file_name);
    let placement = sel.placement;
    let persisted = tokio::task::spawn_blocking(move || {
        atomic::write_bytes(&target, &doc, placement).map_err(|e| IngestError::fs(&target, e))
    })
    .await
    .map_err(|e| IngestError::Internal(format!("write task panicked: {e}")))??;

    Ok(Ok(persisted))
}
