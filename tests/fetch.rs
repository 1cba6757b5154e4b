//! Fetch windows of an asset table against a mocked asset host.

use gta_ingest::{
    fetch, read_table, write_table, AssetKind, AssetRow, FetchConfig, FetchProgressCallback, IngestError,
    ItemError, OutcomeStatus, RetryPolicy, RowOutcome, SkipReason,
};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(6, 4, |x, y| image::Rgb([(x * 40) as u8, (y * 60) as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\ntrailer\n<<>>\n%%EOF\n";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn config(assets: &Path) -> FetchConfig {
    FetchConfig::builder()
        .assets_dir(assets)
        .concurrency(4)
        .retry(fast_retry())
        .build()
        .unwrap()
}

fn table(dir: &Path, rows: &[AssetRow]) -> std::path::PathBuf {
    let path = dir.join("id_url_table.csv");
    write_table(&path, rows).unwrap();
    path
}

async fn mount_image(server: &MockServer, name: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/assets/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png_bytes(), "image/png"))
        .expect(times)
        .mount(server)
        .await;
}

fn is_tiff(path: &Path) -> bool {
    let bytes = std::fs::read(path).unwrap();
    bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*")
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn window_selects_only_its_rows() {
    let server = MockServer::start().await;
    mount_image(&server, "1.png", 0).await;
    mount_image(&server, "2.png", 1).await;
    mount_image(&server, "3.png", 0).await;

    let work = tempfile::tempdir().unwrap();
    let rows: Vec<_> = (1..=3)
        .map(|id| AssetRow::new(id.to_string(), format!("{}/assets/{id}.png", server.uri())))
        .collect();
    let table_path = table(work.path(), &rows);
    let assets = work.path().join("assets");

    let summary = fetch(&table_path, 1, Some(1), &config(&assets)).await.unwrap();

    assert_eq!(summary.table_rows, 3);
    assert_eq!(summary.offset, 1);
    assert_eq!(summary.selected_rows, 1);
    assert_eq!((summary.downloaded, summary.skipped, summary.failed), (1, 0, 0));
    assert_eq!(summary.outcomes[0].index, 1);

    let tif = assets.join("images/cms-2.tif");
    assert!(is_tiff(&tif));
    let decoded = image::open(&tif).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (6, 4));
    assert!(!assets.join("images/cms-1.tif").exists());
    assert!(!assets.join("images/cms-3.tif").exists());
}

#[tokio::test]
async fn rerun_skips_everything_already_on_disk() {
    let server = MockServer::start().await;
    // One request per asset across both runs.
    mount_image(&server, "1.png", 1).await;
    mount_image(&server, "2.png", 1).await;

    let work = tempfile::tempdir().unwrap();
    let rows: Vec<_> = (1..=2)
        .map(|id| AssetRow::new(id.to_string(), format!("{}/assets/{id}.png", server.uri())))
        .collect();
    let table_path = table(work.path(), &rows);
    let cfg = config(&work.path().join("assets"));

    let first = fetch(&table_path, 0, None, &cfg).await.unwrap();
    assert_eq!(first.downloaded, 2);

    let second = fetch(&table_path, 0, None, &cfg).await.unwrap();
    assert_eq!((second.downloaded, second.skipped, second.failed), (0, 2, 0));
    assert!(second.outcomes.iter().all(|o| o.status
        == OutcomeStatus::Skipped {
            reason: SkipReason::AlreadyPresent
        }));
}

#[tokio::test]
async fn failed_rows_end_up_in_retry_table() {
    let server = MockServer::start().await;
    mount_image(&server, "1.png", 1).await;
    Mock::given(method("GET"))
        .and(path("/assets/2.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let work = tempfile::tempdir().unwrap();
    let rows: Vec<_> = (1..=2)
        .map(|id| AssetRow::new(id.to_string(), format!("{}/assets/{id}.png", server.uri())))
        .collect();
    let table_path = table(work.path(), &rows);

    let summary = fetch(&table_path, 0, None, &config(&work.path().join("assets")))
        .await
        .unwrap();

    assert_eq!((summary.downloaded, summary.failed), (1, 1));
    assert_eq!(summary.failed_ids(), vec!["2"]);
    assert!(matches!(
        summary.outcomes[1].error(),
        Some(ItemError::HttpStatus { status: 404, .. })
    ));

    let retry_path = work.path().join("retry.csv");
    summary.write_retry_table(&retry_path).unwrap();
    let retry = read_table(&retry_path).unwrap();
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].id, "2");
}

#[tokio::test]
async fn html_error_page_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assets/7.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>busy</html>", "text/html"))
        .expect(2)
        .mount(&server)
        .await;

    let work = tempfile::tempdir().unwrap();
    let table_path = table(
        work.path(),
        &[AssetRow::new("7", format!("{}/assets/7.jpg", server.uri()))],
    );
    let assets = work.path().join("assets");

    let summary = fetch(&table_path, 0, None, &config(&assets)).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(matches!(
        summary.outcomes[0].error(),
        Some(ItemError::RetriesExhausted { attempts: 2, .. })
    ));
    assert!(!assets.join("images/cms-7.tif").exists());
}

#[tokio::test]
async fn unsupported_extension_fails_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let work = tempfile::tempdir().unwrap();
    let table_path = table(
        work.path(),
        &[
            AssetRow::new("1", format!("{}/assets/drawing.svg", server.uri())),
            AssetRow::new("2", ""),
        ],
    );

    let summary = fetch(&table_path, 0, None, &config(&work.path().join("assets")))
        .await
        .unwrap();
    assert_eq!(summary.failed, 2);
    assert!(matches!(
        summary.outcomes[0].error(),
        Some(ItemError::UnsupportedExtension { .. })
    ));
    assert_eq!(summary.outcomes[1].error(), Some(&ItemError::MissingUrl));
}

#[tokio::test]
async fn pdf_is_stored_verbatim_next_to_the_image() {
    let server = MockServer::start().await;
    mount_image(&server, "3.png", 1).await;
    Mock::given(method("GET"))
        .and(path("/assets/3.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF, "application/pdf"))
        .expect(1)
        .mount(&server)
        .await;

    let work = tempfile::tempdir().unwrap();
    let mut row = AssetRow::new("3", format!("{}/assets/3.png", server.uri()));
    row.pdf_url = format!("{}/assets/3.pdf", server.uri());
    let table_path = table(work.path(), &[row]);
    let assets = work.path().join("assets");

    let summary = fetch(&table_path, 0, None, &config(&assets)).await.unwrap();
    assert_eq!(summary.downloaded, 2);
    let kinds: Vec<_> = summary.outcomes.iter().map(|o| o.kind).collect();
    assert_eq!(kinds, vec![AssetKind::Image, AssetKind::Pdf]);
    assert_eq!(std::fs::read(assets.join("pdfs/cms-3.pdf")).unwrap(), PDF);
    assert!(is_tiff(&assets.join("images/cms-3.tif")));
}

#[tokio::test]
async fn pdfs_can_be_left_out() {
    let server = MockServer::start().await;
    mount_image(&server, "3.png", 1).await;
    Mock::given(method("GET"))
        .and(path("/assets/3.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF, "application/pdf"))
        .expect(0)
        .mount(&server)
        .await;

    let work = tempfile::tempdir().unwrap();
    let mut row = AssetRow::new("3", format!("{}/assets/3.png", server.uri()));
    row.pdf_url = format!("{}/assets/3.pdf", server.uri());
    let table_path = table(work.path(), &[row]);
    let assets = work.path().join("assets");

    let cfg = FetchConfig::builder()
        .assets_dir(&assets)
        .include_pdfs(false)
        .retry(fast_retry())
        .build()
        .unwrap();
    let summary = fetch(&table_path, 0, None, &cfg).await.unwrap();
    assert_eq!(summary.outcomes.len(), 1);
    assert!(!assets.join("pdfs").exists());
}

#[tokio::test]
async fn fake_pdf_is_rejected() {
    let server = MockServer::start().await;
    mount_image(&server, "4.png", 1).await;
    Mock::given(method("GET"))
        .and(path("/assets/4.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "application/octet-stream"))
        .mount(&server)
        .await;

    let work = tempfile::tempdir().unwrap();
    let mut row = AssetRow::new("4", format!("{}/assets/4.png", server.uri()));
    row.pdf_url = format!("{}/assets/4.pdf", server.uri());
    let table_path = table(work.path(), &[row]);
    let assets = work.path().join("assets");

    let summary = fetch(&table_path, 0, None, &config(&assets)).await.unwrap();
    assert_eq!((summary.downloaded, summary.failed), (1, 1));
    assert!(matches!(summary.outcomes[1].error(), Some(ItemError::NotAPdf { .. })));
    assert!(!assets.join("pdfs/cms-4.pdf").exists());

    // Only the PDF needs another pass.
    assert_eq!(summary.retry_rows.len(), 1);
    assert!(!summary.retry_rows[0].pdf_url.is_empty());
}

#[tokio::test]
async fn repeated_id_in_window_is_skipped() {
    let server = MockServer::start().await;
    mount_image(&server, "5.png", 1).await;
    mount_image(&server, "5b.png", 0).await;

    let work = tempfile::tempdir().unwrap();
    let table_path = table(
        work.path(),
        &[
            AssetRow::new("5", format!("{}/assets/5.png", server.uri())),
            AssetRow::new("5", format!("{}/assets/5b.png", server.uri())),
        ],
    );

    let summary = fetch(&table_path, 0, None, &config(&work.path().join("assets")))
        .await
        .unwrap();
    assert_eq!((summary.downloaded, summary.skipped), (1, 1));
    assert_eq!(
        summary.outcomes[1].status,
        OutcomeStatus::Skipped {
            reason: SkipReason::DuplicateId
        }
    );
}

#[tokio::test]
async fn manifest_lists_downloaded_files() {
    let server = MockServer::start().await;
    mount_image(&server, "8.png", 1).await;
    Mock::given(method("GET"))
        .and(path("/assets/9.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let work = tempfile::tempdir().unwrap();
    let table_path = table(
        work.path(),
        &[
            AssetRow::new("8", format!("{}/assets/8.png", server.uri())),
            AssetRow::new("9", format!("{}/assets/9.png", server.uri())),
        ],
    );
    let assets = work.path().join("assets");
    let cfg = FetchConfig::builder()
        .assets_dir(&assets)
        .manifest_dir(work.path().join("manifests"))
        .retry(fast_retry())
        .build()
        .unwrap();

    let summary = fetch(&table_path, 0, None, &cfg).await.unwrap();
    let manifest = summary.manifest_path.clone().unwrap();
    let name = manifest.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("to_db_") && name.ends_with(".csv"), "{name}");

    let text = std::fs::read_to_string(&manifest).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("cms-8.tif,"), "{text}");
    assert!(lines[0].ends_with("cms-8.tif"));

    let pdf_manifest = summary.pdf_manifest_path.unwrap();
    assert_eq!(std::fs::read_to_string(pdf_manifest).unwrap(), "");
}

#[tokio::test]
async fn invalid_table_is_fatal() {
    let work = tempfile::tempdir().unwrap();
    let cfg = config(&work.path().join("assets"));

    let missing = fetch(work.path().join("nope.csv"), 0, None, &cfg).await.unwrap_err();
    assert!(matches!(missing, IngestError::InvalidTable { .. }));

    let bad = work.path().join("bad.csv");
    std::fs::write(&bad, "foo,bar\n1,2\n").unwrap();
    let err = fetch(&bad, 0, None, &cfg).await.unwrap_err();
    assert!(matches!(err, IngestError::InvalidTable { .. }));
}

#[tokio::test]
async fn offset_past_the_end_does_nothing() {
    let work = tempfile::tempdir().unwrap();
    let table_path = table(work.path(), &[AssetRow::new("1", "https://example.invalid/1.png")]);

    let summary = fetch(&table_path, 5, Some(10), &config(&work.path().join("assets")))
        .await
        .unwrap();
    assert_eq!(summary.selected_rows, 0);
    assert!(summary.outcomes.is_empty());
}

#[derive(Default)]
struct Recorder {
    total: AtomicUsize,
    started: AtomicUsize,
    completed: AtomicUsize,
    finished: AtomicUsize,
}

impl FetchProgressCallback for Recorder {
    fn on_fetch_start(&self, total_assets: usize) {
        self.total.store(total_assets, Ordering::SeqCst);
    }

    fn on_row_start(&self, _index: usize, _id: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_row_complete(&self, _outcome: &RowOutcome) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_fetch_complete(&self, _downloaded: usize, _skipped: usize, _failed: usize) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_asset() {
    let server = MockServer::start().await;
    mount_image(&server, "1.png", 1).await;
    mount_image(&server, "2.png", 1).await;

    let work = tempfile::tempdir().unwrap();
    let table_path = table(
        work.path(),
        &[
            AssetRow::new("1", format!("{}/assets/1.png", server.uri())),
            AssetRow::new("2", format!("{}/assets/2.png", server.uri())),
            AssetRow::new("2", format!("{}/assets/2.png", server.uri())),
        ],
    );
    let recorder = Arc::new(Recorder::default());
    let cfg = FetchConfig::builder()
        .assets_dir(work.path().join("assets"))
        .retry(fast_retry())
        .progress_callback(recorder.clone() as Arc<dyn FetchProgressCallback>)
        .build()
        .unwrap();

    fetch(&table_path, 0, None, &cfg).await.unwrap();
    assert_eq!(recorder.total.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn corrupt_asset_fails_alone_and_transient_error_recovers() {
    let server = MockServer::start().await;
    mount_image(&server, "1.png", 1).await;
    let mut corrupt = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    corrupt.extend_from_slice(b"JFIF\0 this is not really a jpeg");
    Mock::given(method("GET"))
        .and(path("/assets/2.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(corrupt, "image/jpeg"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/assets/3.png"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_image(&server, "3.png", 1).await;

    let work = tempfile::tempdir().unwrap();
    let table_path = table(
        work.path(),
        &[
            AssetRow::new("1", format!("{}/assets/1.png", server.uri())),
            AssetRow::new("2", format!("{}/assets/2.jpg", server.uri())),
            AssetRow::new("3", format!("{}/assets/3.png", server.uri())),
        ],
    );
    let assets = work.path().join("assets");

    let summary = fetch(&table_path, 0, None, &config(&assets)).await.unwrap();
    assert_eq!((summary.downloaded, summary.skipped, summary.failed), (2, 0, 1));
    assert_eq!(summary.failed_ids(), vec!["2"]);
    assert!(matches!(
        summary.outcomes[1].error(),
        Some(ItemError::Undecodable { .. })
    ));
    assert!(is_tiff(&assets.join("images/cms-1.tif")));
    assert!(is_tiff(&assets.join("images/cms-3.tif")));
    assert!(!assets.join("images/cms-2.tif").exists());
}

fn asset_files(assets: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = std::fs::read_dir(assets.join("images"))
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (
                e.file_name().to_string_lossy().into_owned(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn interrupted_run_resumes_to_the_same_asset_set() {
    let server = MockServer::start().await;
    // Once for the uninterrupted tree, once for the resumed one.
    for id in 1..=4 {
        mount_image(&server, &format!("{id}.png"), 2).await;
    }

    let work = tempfile::tempdir().unwrap();
    let rows: Vec<_> = (1..=4)
        .map(|id| AssetRow::new(id.to_string(), format!("{}/assets/{id}.png", server.uri())))
        .collect();
    let table_path = table(work.path(), &rows);

    let whole = work.path().join("whole");
    let full = fetch(&table_path, 0, None, &config(&whole)).await.unwrap();
    assert_eq!(full.downloaded, 4);

    // Stopped after two rows, then restarted from there.
    let resumed = work.path().join("resumed");
    let cfg = config(&resumed);
    let head = fetch(&table_path, 0, Some(2), &cfg).await.unwrap();
    assert_eq!(head.downloaded, 2);
    let tail = fetch(&table_path, 2, None, &cfg).await.unwrap();
    assert_eq!((tail.downloaded, tail.skipped), (2, 0));

    // Restarting with an overlapping window only skips.
    let overlap = fetch(&table_path, 1, Some(2), &cfg).await.unwrap();
    assert_eq!((overlap.downloaded, overlap.skipped, overlap.failed), (0, 2, 0));

    assert_eq!(asset_files(&whole), asset_files(&resumed));
}

#[tokio::test]
async fn zero_concurrency_in_struct_literal_still_runs() {
    let server = MockServer::start().await;
    mount_image(&server, "1.png", 1).await;

    let work = tempfile::tempdir().unwrap();
    let table_path = table(
        work.path(),
        &[AssetRow::new("1", format!("{}/assets/1.png", server.uri()))],
    );
    let cfg = FetchConfig {
        assets_dir: work.path().join("assets"),
        concurrency: 0,
        retry: fast_retry(),
        ..FetchConfig::default()
    };

    let summary = tokio::time::timeout(Duration::from_secs(30), fetch(&table_path, 0, None, &cfg))
        .await
        .expect("fetch stalled")
        .unwrap();
    assert_eq!(summary.downloaded, 1);
}
