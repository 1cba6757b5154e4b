//! CLI binary for gta-ingest.
//!
//! A thin shim over the library crate: one subcommand per pipeline stage,
//! flags mapped onto the config builders, results printed to stderr (or as
//! JSON to stdout).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gta_ingest::{
    extract, fetch, harvest, Credentials, ExtractConfig, FetchConfig, FetchProgressCallback, HarvestConfig,
    HarvestMode, HarvestRequest, Module, OutcomeStatus, ProgressCallback, RetryPolicy, RowOutcome, DEFAULT_SERVER,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress for `fetch`: one bar over all assets of the window,
/// with a log line for each failure. Rows finish out of order, so the bar
/// only counts.
struct CliProgressCallback {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading table…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed: AtomicUsize::new(0),
        })
    }
}

impl FetchProgressCallback for CliProgressCallback {
    fn on_fetch_start(&self, total_assets: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>5}/{len} assets  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_assets as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Fetching");
        self.bar.reset_eta();
    }

    fn on_row_start(&self, _index: usize, id: &str) {
        self.bar.set_message(format!("id {id}"));
    }

    fn on_row_complete(&self, outcome: &RowOutcome) {
        if let OutcomeStatus::Failed { error } = &outcome.status {
            self.failed.fetch_add(1, Ordering::SeqCst);
            let msg = error.to_string();
            let msg = if msg.chars().count() > 90 {
                format!("{}…", msg.chars().take(89).collect::<String>())
            } else {
                msg
            };
            self.bar.println(format!(
                "  {} row {:>6}  id {:<10} {}",
                red("✗"),
                outcome.index,
                outcome.id,
                red(&msg)
            ));
        }
        self.bar.inc(1);
    }

    fn on_fetch_complete(&self, downloaded: usize, skipped: usize, failed: usize) {
        self.bar.finish_and_clear();
        let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{} {} downloaded  {} skipped  {} failed",
            mark,
            bold(&downloaded.to_string()),
            dim(&skipped.to_string()),
            if failed == 0 {
                failed.to_string()
            } else {
                red(&failed.to_string())
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Incremental harvest of the digital objects
  gta-ingest harvest --module digital_object --login bot --password '***' \
      --base-folder /data/source

  # Full re-harvest into a test folder
  gta-ingest harvest --module digital_object --download-mode all \
      --login bot --password '***' --base-folder /tmp/source

  # Build the asset table
  gta-ingest extract --input-folder /data/source/digital_object --output-folder /data

  # Fetch the first 500 rows, write failures to a retry table
  gta-ingest fetch --data-folder /data --input-file id_url_table.csv \
      --offset 0 --limit 500 --assets-folder /data/assets --retry-table /data/retry.csv

  # Fetch again from the retry table only
  gta-ingest fetch --data-folder /data --input-file retry.csv --assets-folder /data/assets

MODULES:
  person, group, architectural_competition, archival_object, bibliographic_item,
  digital_object, oeuvre, built_work, project, place

ENVIRONMENT VARIABLES:
  Every flag can also be set as GTA_<FLAG>, e.g. GTA_LOGIN, GTA_PASSWORD,
  GTA_BASE_FOLDER, GTA_OFFSET, GTA_LIMIT. RUST_LOG overrides the log filter.
"#;

/// Ingest EasyDB metadata and assets for the image server.
#[derive(Parser, Debug)]
#[command(
    name = "gta-ingest",
    version,
    about = "Harvest EasyDB metadata, extract asset URLs and fetch assets as TIFF",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "GTA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "GTA_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "GTA_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download metadata documents for one module.
    Harvest(HarvestArgs),
    /// Build id_url_table.csv from harvested documents.
    Extract(ExtractArgs),
    /// Download and convert the assets of a table window.
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
struct HarvestArgs {
    /// Module to harvest (see MODULES in --help).
    #[arg(long, env = "GTA_MODULE")]
    module: String,

    /// EasyDB login.
    #[arg(long, env = "GTA_LOGIN")]
    login: String,

    /// EasyDB password.
    #[arg(long, env = "GTA_PASSWORD", hide_env_values = true)]
    password: String,

    /// all (full re-download), update (missing items only) or sample.
    #[arg(long, env = "GTA_DOWNLOAD_MODE", default_value = "update", value_parser = parse_mode)]
    download_mode: HarvestMode,

    /// Documents are written to <base-folder>/<module>/.
    #[arg(long, env = "GTA_BASE_FOLDER")]
    base_folder: PathBuf,

    /// File name prefix of the documents.
    #[arg(long, env = "GTA_FILENAME_PREFIX", default_value = gta_ingest::DEFAULT_FILENAME_PREFIX)]
    filename_prefix: String,

    /// EasyDB base URL.
    #[arg(long, env = "GTA_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Items per listing request.
    #[arg(long, env = "GTA_PAGE_SIZE", default_value_t = 500)]
    page_size: usize,

    /// In update mode, also refetch items whose remote timestamp is newer.
    #[arg(long, env = "GTA_COMPARE_TIMESTAMPS")]
    compare_timestamps: bool,

    /// Retries per request on transient failure.
    #[arg(long, env = "GTA_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "GTA_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Print the HarvestReport as JSON on stdout.
    #[arg(long, env = "GTA_JSON")]
    json: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Folder holding the harvested *.xml documents.
    #[arg(long, env = "GTA_INPUT_FOLDER")]
    input_folder: PathBuf,

    /// Folder for id_url_table.csv.
    #[arg(long, env = "GTA_OUTPUT_FOLDER")]
    output_folder: PathBuf,

    /// Object element whose _id names the row.
    #[arg(long, env = "GTA_OBJECTTYPE", default_value = "do_grpm_06")]
    objecttype: String,

    /// Element below the record whose files hold the assets.
    #[arg(long, env = "GTA_ASSET_ELEMENT", default_value = "do_digitalobject")]
    asset_element: String,

    /// Print the ExtractReport as JSON on stdout.
    #[arg(long, env = "GTA_JSON")]
    json: bool,
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Asset table, relative to --data-folder.
    #[arg(long, env = "GTA_INPUT_FILE", default_value = gta_ingest::TABLE_FILE_NAME)]
    input_file: PathBuf,

    /// Folder holding the asset table.
    #[arg(long, env = "GTA_DATA_FOLDER", default_value = ".")]
    data_folder: PathBuf,

    /// First row (0-based) to process.
    #[arg(long, env = "GTA_OFFSET", default_value_t = 0)]
    offset: usize,

    /// Number of rows to process; all remaining rows when omitted.
    #[arg(long, env = "GTA_LIMIT")]
    limit: Option<usize>,

    /// Root of the asset tree (images/ and pdfs/ below it).
    #[arg(long, env = "GTA_ASSETS_FOLDER", default_value = "assets")]
    assets_folder: PathBuf,

    /// Rows downloaded concurrently.
    #[arg(short, long, env = "GTA_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Skip the pdf_url column.
    #[arg(long, env = "GTA_NO_PDFS")]
    no_pdfs: bool,

    /// Write the rows of failed assets to this table.
    #[arg(long, env = "GTA_RETRY_TABLE")]
    retry_table: Option<PathBuf>,

    /// Write to_db_<timestamp>.csv manifests of downloaded files here.
    #[arg(long, env = "GTA_MANIFEST_FOLDER")]
    manifest_folder: Option<PathBuf>,

    /// Retries per asset on transient failure.
    #[arg(long, env = "GTA_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "GTA_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Print the FetchSummary as JSON on stdout.
    #[arg(long, env = "GTA_JSON")]
    json: bool,
}

fn parse_mode(s: &str) -> Result<HarvestMode, String> {
    HarvestMode::parse(s).map_err(|e| e.to_string())
}

fn retry_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        ..RetryPolicy::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are hidden while the progress bar is drawn.
    let json = match &cli.command {
        Command::Harvest(a) => a.json,
        Command::Extract(a) => a.json,
        Command::Fetch(a) => a.json,
    };
    let show_progress = matches!(cli.command, Command::Fetch(_)) && !cli.quiet && !cli.no_progress && !json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Harvest(args) => run_harvest(args, cli.quiet).await,
        Command::Extract(args) => run_extract(args, cli.quiet).await,
        Command::Fetch(args) => run_fetch(args, cli.quiet, show_progress).await,
    }
}

async fn run_harvest(args: HarvestArgs, quiet: bool) -> Result<()> {
    let config = HarvestConfig::builder()
        .server_url(&args.server)
        .page_size(args.page_size)
        .compare_timestamps(args.compare_timestamps)
        .request_timeout_secs(args.timeout)
        .retry(retry_policy(args.max_retries))
        .build()
        .context("Invalid harvest options")?;

    let request = HarvestRequest::new(
        &args.module,
        Credentials::new(&args.login, &args.password),
        &args.base_folder,
    )
    .with_mode(args.download_mode)
    .with_filename_prefix(&args.filename_prefix);

    let report = harvest(&request, &config).await.with_context(|| {
        format!(
            "Harvest of module '{}' failed (known modules: {})",
            args.module,
            Module::names().join(", ")
        )
    })?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !quiet {
        let mark = if report.failed.is_empty() { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{} {}: {} listed, {} written, {} skipped, {} failed  {}",
            mark,
            bold(&report.module),
            report.listed,
            report.written,
            report.skipped,
            report.failed.len(),
            dim(&format!("{}ms", report.duration_ms)),
        );
        for f in &report.failed {
            eprintln!("  {} id {:<10} {}", red("✗"), f.id, f.error);
        }
    }
    Ok(())
}

async fn run_extract(args: ExtractArgs, quiet: bool) -> Result<()> {
    let config = ExtractConfig {
        objecttype: args.objecttype.clone(),
        asset_element: args.asset_element.clone(),
        ..ExtractConfig::default()
    };
    let report = extract(&args.input_folder, &args.output_folder, &config)
        .await
        .context("Extraction failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !quiet {
        eprintln!(
            "{} {} rows from {} documents  →  {}",
            green("✔"),
            bold(&report.rows.to_string()),
            report.documents,
            bold(&report.table_path.display().to_string()),
        );
        for s in &report.skipped {
            eprintln!("  {} {:<24} {}", cyan("–"), s.file, dim(&s.error.to_string()));
        }
    }
    Ok(())
}

async fn run_fetch(args: FetchArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let table_path = args.data_folder.join(&args.input_file);

    let mut builder = FetchConfig::builder()
        .assets_dir(&args.assets_folder)
        .concurrency(args.concurrency)
        .include_pdfs(!args.no_pdfs)
        .request_timeout_secs(args.timeout)
        .retry(retry_policy(args.max_retries));
    if let Some(ref dir) = args.manifest_folder {
        builder = builder.manifest_dir(dir);
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid fetch options")?;

    let summary = fetch(&table_path, args.offset, args.limit, &config)
        .await
        .with_context(|| format!("Fetch from {} failed", table_path.display()))?;

    if let Some(ref path) = args.retry_table {
        summary
            .write_retry_table(path)
            .with_context(|| format!("Failed to write retry table {}", path.display()))?;
        if !quiet && !summary.retry_rows.is_empty() {
            eprintln!(
                "   {} rows to retry  →  {}",
                summary.retry_rows.len(),
                bold(&path.display().to_string())
            );
        }
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !quiet && !show_progress {
        // The progress callback prints its own summary line.
        eprintln!(
            "Rows {}..{} of {}: {} downloaded, {} skipped, {} failed in {}ms",
            summary.offset,
            summary.offset + summary.selected_rows,
            summary.table_rows,
            summary.downloaded,
            summary.skipped,
            summary.failed,
            summary.duration_ms
        );
        for o in summary.failures() {
            if let Some(e) = o.error() {
                eprintln!("  row {:>6}  id {:<10} {}", o.index, o.id, e);
            }
        }
    }
    Ok(())
}
