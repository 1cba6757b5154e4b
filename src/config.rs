//! Configuration types for the three pipeline stages.
//!
//! Each stage has one config struct with a documented default for every
//! knob and a builder that validates in `build()`. The retry policy is
//! shared: the harvester and the fetcher hand the same [`RetryPolicy`] type
//! to [`crate::retry::with_retry`].

use crate::error::IngestError;
use crate::progress::FetchProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default EasyDB instance.
pub const DEFAULT_SERVER: &str = "https://collections.gta.arch.ethz.ch";

/// File name of the table written by the extractor.
pub const TABLE_FILE_NAME: &str = "id_url_table.csv";

/// Browser-like agent; the asset host rejects unknown clients.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X x.y; rv:42.0) Gecko/20100101 Firefox/42.0";

// ── Retry ────────────────────────────────────────────────────────────────

/// Bounded exponential backoff for transient network failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 500 ms.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay, including `Retry-After`. Default: 30 s.
    pub max_backoff: Duration,
    /// Growth factor between retries. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Add 0–100 % random jitter to each computed delay. Default: true.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts a retryable failure has consumed once it escapes the wrapper.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

// ── Harvest ──────────────────────────────────────────────────────────────

/// Which remote items a harvest writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestMode {
    /// Fetch and overwrite every listed item.
    Full,
    /// Fetch only items without a local document. (default)
    #[default]
    Update,
    /// Like `Full`, restricted to the module's sample pools and tags.
    Sample,
}

impl HarvestMode {
    /// Parse the invocation value (`all`/`full`, `update`, `sample`).
    pub fn parse(s: &str) -> Result<Self, IngestError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "full" => Ok(HarvestMode::Full),
            "update" => Ok(HarvestMode::Update),
            "sample" => Ok(HarvestMode::Sample),
            other => Err(IngestError::InvalidConfig(format!(
                "download mode must be all, update or sample, got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for HarvestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HarvestMode::Full => "full",
            HarvestMode::Update => "update",
            HarvestMode::Sample => "sample",
        })
    }
}

/// Login and password for the remote API.
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for [`crate::harvest`].
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Base URL of the EasyDB instance. Default: [`DEFAULT_SERVER`].
    pub server_url: String,

    /// Items requested per listing page. Range: 1–10 000. Default: 500.
    pub page_size: usize,

    /// In update mode, also refetch items whose remote `_last_modified` is
    /// newer than the value recorded at the last harvest. Default: false
    /// (presence of the local document is the only watermark).
    pub compare_timestamps: bool,

    /// Per-request timeout in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// Retry policy for session, listing and document requests.
    pub retry: RetryPolicy,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER.to_string(),
            page_size: 500,
            compare_timestamps: false,
            request_timeout_secs: 120,
            retry: RetryPolicy::default(),
        }
    }
}

impl HarvestConfig {
    pub fn builder() -> HarvestConfigBuilder {
        HarvestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`HarvestConfig`].
#[derive(Debug)]
pub struct HarvestConfigBuilder {
    config: HarvestConfig,
}

impl HarvestConfigBuilder {
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into();
        self
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.config.page_size = n;
        self
    }

    pub fn compare_timestamps(mut self, v: bool) -> Self {
        self.config.compare_timestamps = v;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<HarvestConfig, IngestError> {
        let c = &self.config;
        if c.page_size == 0 || c.page_size > 10_000 {
            return Err(IngestError::InvalidConfig(format!(
                "page size must be 1–10000, got {}",
                c.page_size
            )));
        }
        if !(c.server_url.starts_with("http://") || c.server_url.starts_with("https://")) {
            return Err(IngestError::InvalidConfig(format!(
                "server URL must start with http:// or https://, got '{}'",
                c.server_url
            )));
        }
        Ok(self.config)
    }
}

// ── Extract ──────────────────────────────────────────────────────────────

/// Configuration for [`crate::extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractConfig {
    /// Object element whose direct `_id` child is the row id. Default: `do_grpm_06`.
    pub objecttype: String,
    /// Child of the record holding its `files`; linked records elsewhere in
    /// the document are ignored. Default: `do_digitalobject`.
    pub asset_element: String,
    /// Output file name inside the output folder. Default: [`TABLE_FILE_NAME`].
    pub table_name: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            objecttype: "do_grpm_06".to_string(),
            asset_element: "do_digitalobject".to_string(),
            table_name: TABLE_FILE_NAME.to_string(),
        }
    }
}

// ── Fetch ────────────────────────────────────────────────────────────────

/// Configuration for [`crate::fetch`].
#[derive(Clone)]
pub struct FetchConfig {
    /// Root of the asset tree; images land in `images/`, PDFs in `pdfs/`.
    /// Default: `assets`.
    pub assets_dir: PathBuf,

    /// Number of rows downloaded concurrently. Default: 8.
    pub concurrency: usize,

    /// Also fetch the `pdf_url` column. Default: true.
    pub include_pdfs: bool,

    /// Per-request timeout in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// `User-Agent` sent with asset requests. Default: [`DEFAULT_USER_AGENT`].
    pub user_agent: String,

    /// Retry policy for asset downloads.
    pub retry: RetryPolicy,

    /// When set, a `to_db_<timestamp>.csv` manifest of downloaded files is
    /// written into this folder.
    pub manifest_dir: Option<PathBuf>,

    /// Per-row progress events.
    pub progress_callback: Option<Arc<dyn FetchProgressCallback>>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            concurrency: 8,
            include_pdfs: true,
            request_timeout_secs: 120,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry: RetryPolicy::default(),
            manifest_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("assets_dir", &self.assets_dir)
            .field("concurrency", &self.concurrency)
            .field("include_pdfs", &self.include_pdfs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .field("manifest_dir", &self.manifest_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn FetchProgressCallback>"),
            )
            .finish()
    }
}

impl FetchConfig {
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding converted images.
    pub fn images_dir(&self) -> PathBuf {
        self.assets_dir.join("images")
    }

    /// Directory holding PDFs.
    pub fn pdfs_dir(&self) -> PathBuf {
        self.assets_dir.join("pdfs")
    }
}

/// Builder for [`FetchConfig`].
#[derive(Debug)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    pub fn assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.assets_dir = dir.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn include_pdfs(mut self, v: bool) -> Self {
        self.config.include_pdfs = v;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.manifest_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn FetchProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FetchConfig, IngestError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(IngestError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.request_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
