// Tests for QuarterGate against a mocked release server
// Uses mockito for HTTP mocking and the workbooks under sample-data-files/

use energy_trends::importers::downloader::{DownloadError, SpreadsheetDownloader};
use energy_trends::quarter::QuarterLabel;
use energy_trends::retry::RetryPolicy;
use energy_trends::services::quarter_gate::QuarterGate;
use mockito::{Server, ServerGuard};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("sample-data-files")
        .join(name);
    fs::read(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

fn q(text: &str) -> QuarterLabel {
    text.parse().unwrap()
}

fn downloader(staging: &Path) -> SpreadsheetDownloader {
    SpreadsheetDownloader::new(
        staging,
        RetryPolicy::new(1, Duration::ZERO, 2.0),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn is_empty(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}

async fn serve(server: &mut ServerGuard, path: &str, body: Vec<u8>) -> mockito::Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_body(body)
        .create_async()
        .await
}

#[tokio::test]
async fn test_newer_quarter_detected() {
    let mut server = Server::new_async().await;
    let mock = serve(&mut server, "/ET_3.1.xlsx", fixture("quarter_basic.xlsx")).await;

    let scratch = tempfile::tempdir().unwrap();
    let downloader = downloader(scratch.path());
    let gate = QuarterGate::new(&downloader, scratch.path());

    let url = Url::parse(&format!("{}/ET_3.1.xlsx", server.url())).unwrap();
    let decision = gate
        .evaluate(&url, "ET_3.1.xlsx", q("2023 1st quarter"))
        .await
        .unwrap();

    assert!(decision.is_newer);
    assert_eq!(decision.newest, q("2024 2nd quarter"));
    assert!(is_empty(scratch.path()), "scratch file left behind");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_same_quarter_is_not_newer() {
    let mut server = Server::new_async().await;
    let mock = serve(&mut server, "/ET_3.1.xlsx", fixture("quarter_basic.xlsx")).await;

    let scratch = tempfile::tempdir().unwrap();
    let downloader = downloader(scratch.path());
    let gate = QuarterGate::new(&downloader, scratch.path());

    let url = Url::parse(&format!("{}/ET_3.1.xlsx", server.url())).unwrap();
    let decision = gate
        .evaluate(&url, "ET_3.1.xlsx", q("2024 2nd quarter"))
        .await
        .unwrap();

    assert!(!decision.is_newer);
    assert_eq!(decision.newest, q("2024 2nd quarter"));
    assert!(is_empty(scratch.path()));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_unreadable_workbook_fails_closed() {
    let mut server = Server::new_async().await;
    let mock = serve(&mut server, "/broken.xlsx", b"this is not a workbook".to_vec()).await;

    let scratch = tempfile::tempdir().unwrap();
    let downloader = downloader(scratch.path());
    let gate = QuarterGate::new(&downloader, scratch.path());

    let url = Url::parse(&format!("{}/broken.xlsx", server.url())).unwrap();
    let decision = gate
        .evaluate(&url, "broken.xlsx", q("2023 1st quarter"))
        .await
        .unwrap();

    assert!(!decision.is_newer);
    assert_eq!(decision.newest, q("2023 1st quarter"));
    assert!(is_empty(scratch.path()));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_quarter_sheet_fails_closed() {
    let mut server = Server::new_async().await;
    let mock = serve(&mut server, "/annual.xlsx", fixture("no_quarter_sheet.xlsx")).await;

    let scratch = tempfile::tempdir().unwrap();
    let downloader = downloader(scratch.path());
    let gate = QuarterGate::new(&downloader, scratch.path());

    let url = Url::parse(&format!("{}/annual.xlsx", server.url())).unwrap();
    let decision = gate
        .evaluate(&url, "annual.xlsx", q("2023 1st quarter"))
        .await
        .unwrap();

    assert!(!decision.is_newer);
    assert!(is_empty(scratch.path()));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_failure_is_returned() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/gone.xlsx")
        .with_status(404)
        .create_async()
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let downloader = downloader(scratch.path());
    let gate = QuarterGate::new(&downloader, scratch.path());

    let url = Url::parse(&format!("{}/gone.xlsx", server.url())).unwrap();
    let result = gate
        .evaluate(&url, "gone.xlsx", q("2023 1st quarter"))
        .await;

    assert!(matches!(
        result,
        Err(DownloadError::Status { status: 404, .. })
    ));
    assert!(is_empty(scratch.path()));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_shared_scratch_and_output_dir_keeps_release() {
    let mut server = Server::new_async().await;
    let mock = serve(&mut server, "/ET_3.1.xlsx", fixture("quarter_basic.xlsx")).await;

    // Scratch and output share one directory that already holds the release
    let shared = tempfile::tempdir().unwrap();
    let kept = shared.path().join("ET_3.1.xlsx");
    fs::write(&kept, b"previously downloaded release").unwrap();

    let downloader = downloader(shared.path());
    let gate = QuarterGate::new(&downloader, shared.path());

    let url = Url::parse(&format!("{}/ET_3.1.xlsx", server.url())).unwrap();
    let decision = gate
        .evaluate(&url, "ET_3.1.xlsx", q("2024 2nd quarter"))
        .await
        .unwrap();

    assert!(!decision.is_newer);
    assert_eq!(fs::read(&kept).unwrap(), b"previously downloaded release");
    assert_eq!(fs::read_dir(shared.path()).unwrap().count(), 1);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_quarter_header_with_trailing_text_keeps_gate_closed() {
    let mut server = Server::new_async().await;
    let mock = serve(&mut server, "/ET_3.1.xlsx", fixture("quarter_provisional.xlsx")).await;

    let scratch = tempfile::tempdir().unwrap();
    let downloader = downloader(scratch.path());
    let gate = QuarterGate::new(&downloader, scratch.path());

    let url = Url::parse(&format!("{}/ET_3.1.xlsx", server.url())).unwrap();
    let decision = gate
        .evaluate(&url, "ET_3.1.xlsx", q("2023 1st quarter"))
        .await
        .unwrap();

    assert!(!decision.is_newer);
    assert_eq!(decision.newest, q("2023 1st quarter"));
    assert!(is_empty(scratch.path()));

    mock.assert_async().await;
}
