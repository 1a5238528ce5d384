// End-to-end tests for Application: listing page, gate, download, reshape and
// export against a mocked server

use energy_trends::app::{AppError, Application, CheckOutcome, RunOutcome};
use energy_trends::config::Config;
use energy_trends::gate_state::{FileGateStateStore, GateStateStore};
use energy_trends::quarter::QuarterLabel;
use mockito::{Server, ServerGuard};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const LISTING_PATH: &str = "/government/statistics/oil-and-oil-products-section-3-energy-trends";
const WORKBOOK_PATH: &str = "/media/ET_3.1_supply.xlsx";

struct TestEnv {
    _output: TempDir,
    _scratch: TempDir,
    config: Config,
}

fn fixture(name: &str) -> Vec<u8> {
    fs::read(
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("sample-data-files")
            .join(name),
    )
    .unwrap()
}

fn q(text: &str) -> QuarterLabel {
    text.parse().unwrap()
}

fn test_env(server: &ServerGuard, last_known: &str) -> TestEnv {
    let output = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    let vars: HashMap<&str, String> = HashMap::from([
        ("ENERGY_PAGE_URL", format!("{}{}", server.url(), LISTING_PATH)),
        ("ENERGY_OUTPUT_DIR", output.path().display().to_string()),
        ("ENERGY_SCRATCH_DIR", scratch.path().display().to_string()),
        ("ENERGY_LAST_KNOWN_QUARTER", last_known.to_string()),
        ("ENERGY_MAX_RETRIES", "1".to_string()),
        ("ENERGY_RETRY_DELAY_SECS", "0".to_string()),
    ]);
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();

    TestEnv {
        _output: output,
        _scratch: scratch,
        config,
    }
}

fn listing_page() -> String {
    format!(
        r#"<html><body>
            <h2>Oil and oil products: section 3 energy trends</h2>
            <section>
                <h3>Supply and use of crude oil, natural gas liquids and feedstocks (ET 3.1)</h3>
                <a href="{WORKBOOK_PATH}">ET 3.1 quarterly and annual data</a>
            </section>
        </body></html>"#
    )
}

async fn mock_listing(server: &mut ServerGuard, hits: usize) -> mockito::Mock {
    server
        .mock("GET", LISTING_PATH)
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(listing_page())
        .expect(hits)
        .create_async()
        .await
}

async fn mock_workbook(server: &mut ServerGuard, hits: usize) -> mockito::Mock {
    server
        .mock("GET", WORKBOOK_PATH)
        .with_status(200)
        .with_body(fixture("ET_3.1_supply.xlsx"))
        .expect(hits)
        .create_async()
        .await
}

fn read_output(path: &Path) -> Vec<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.deserialize().map(|r| r.unwrap()).collect()
}

fn quantity(rows: &[HashMap<String, String>], sub_category: &str, quarter: &str) -> Option<f64> {
    let row = rows
        .iter()
        .find(|r| r["Sub_Category"] == sub_category && r["Quarter"] == quarter)
        .unwrap_or_else(|| panic!("missing {sub_category} {quarter}"));
    let value = row["Quantity"].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.parse().unwrap())
    }
}

#[tokio::test]
async fn test_run_processes_newer_release_then_stays_up_to_date() {
    let mut server = Server::new_async().await;
    let listing = mock_listing(&mut server, 2).await;
    // Gate inspection and kept download on the first run, inspection only on the second
    let workbook = mock_workbook(&mut server, 3).await;

    let env = test_env(&server, "2024 1st quarter");
    let app = Application::build(env.config.clone()).unwrap();

    let outcome = app.run().await.unwrap();
    let RunOutcome::Updated {
        newest,
        spreadsheet,
        report,
    } = outcome
    else {
        panic!("Expected Updated, got {outcome:?}");
    };

    assert_eq!(newest, q("2024 4th quarter"));
    assert_eq!(
        spreadsheet,
        env.config.output_dir.join("ET_3.1_supply.xlsx")
    );
    assert!(spreadsheet.exists());
    assert_eq!(report.rows, 30);
    assert_eq!(report.output, env.config.output_path());

    let rows = read_output(&report.output);
    assert_eq!(rows.len(), 30);
    assert!(rows.iter().all(|r| r["FileName"] == "ET_3.1_supply.xlsx"));
    assert!(rows.iter().all(|r| {
        let date = &r["ProcessedDate"];
        date.len() == 10 && &date[2..3] == "/" && &date[5..6] == "/"
    }));

    let stored = FileGateStateStore::new(&env.config.state_file).load().unwrap();
    assert_eq!(stored, Some(q("2024 4th quarter")));
    assert!(fs::read_dir(&env.config.scratch_dir).unwrap().next().is_none());

    let outcome = app.run().await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::UpToDate {
            latest: q("2024 4th quarter")
        }
    );

    listing.assert_async().await;
    workbook.assert_async().await;
}

#[tokio::test]
async fn test_run_skips_download_when_not_newer() {
    let mut server = Server::new_async().await;
    let listing = mock_listing(&mut server, 1).await;
    let workbook = mock_workbook(&mut server, 1).await;

    let env = test_env(&server, "2025 1st quarter");
    let app = Application::build(env.config.clone()).unwrap();

    let outcome = app.run().await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::UpToDate {
            latest: q("2025 1st quarter")
        }
    );
    assert!(!env.config.output_path().exists());
    assert!(!env.config.state_file.exists());

    listing.assert_async().await;
    workbook.assert_async().await;
}

#[tokio::test]
async fn test_run_without_spreadsheet_link() {
    let mut server = Server::new_async().await;
    let listing = server
        .mock("GET", LISTING_PATH)
        .with_status(200)
        .with_body("<html><body><p>Nothing published yet</p></body></html>")
        .create_async()
        .await;

    let env = test_env(&server, "2024 1st quarter");
    let app = Application::build(env.config.clone()).unwrap();

    assert_eq!(app.run().await.unwrap(), RunOutcome::NoSpreadsheet);
    listing.assert_async().await;
}

#[tokio::test]
async fn test_check_does_not_keep_files() {
    let mut server = Server::new_async().await;
    let listing = mock_listing(&mut server, 1).await;
    let workbook = mock_workbook(&mut server, 1).await;

    let env = test_env(&server, "2024 1st quarter");
    let app = Application::build(env.config.clone()).unwrap();

    let outcome = app.check().await.unwrap();
    let CheckOutcome::Checked {
        candidate,
        decision,
    } = outcome
    else {
        panic!("Expected Checked, got {outcome:?}");
    };

    assert_eq!(candidate.file_name, "ET_3.1_supply.xlsx");
    assert_eq!(
        candidate.url.as_str(),
        format!("{}{}", server.url(), WORKBOOK_PATH)
    );
    assert!(decision.is_newer);
    assert_eq!(decision.newest, q("2024 4th quarter"));

    assert!(fs::read_dir(&env.config.output_dir).unwrap().next().is_none());
    assert!(fs::read_dir(&env.config.scratch_dir).unwrap().next().is_none());

    listing.assert_async().await;
    workbook.assert_async().await;
}

#[tokio::test]
async fn test_listing_page_error_is_returned() {
    let mut server = Server::new_async().await;
    let listing = server
        .mock("GET", LISTING_PATH)
        .with_status(500)
        .create_async()
        .await;

    let env = test_env(&server, "2024 1st quarter");
    let app = Application::build(env.config.clone()).unwrap();

    assert!(matches!(app.run().await, Err(AppError::Fetch(_))));
    listing.assert_async().await;
}

#[tokio::test]
async fn test_stored_quarter_overrides_older_configured_quarter() {
    let server = Server::new_async().await;
    let env = test_env(&server, "2023 1st quarter");

    FileGateStateStore::new(&env.config.state_file)
        .save(q("2024 3rd quarter"))
        .unwrap();

    let app = Application::build(env.config.clone()).unwrap();
    assert_eq!(app.last_known_quarter().unwrap(), q("2024 3rd quarter"));
}

#[tokio::test]
async fn test_reshape_file_writes_long_table() {
    let server = Server::new_async().await;
    let env = test_env(&server, "2024 1st quarter");

    let source = env.config.output_dir.join("ET_3.1_supply.xlsx");
    fs::write(&source, fixture("ET_3.1_supply.xlsx")).unwrap();

    let app = Application::build(env.config.clone()).unwrap();
    let report = app.reshape_latest().await.unwrap();

    assert_eq!(report.source, source);
    assert_eq!(report.rows, 30);

    let rows = read_output(&report.output);
    assert_eq!(rows.len(), 30);

    // Crude oil and NGLs folded into one production line
    assert_eq!(
        quantity(&rows, "Indigenous production_Crude Oil & NGLs", "202402"),
        Some(220.0)
    );
    assert_eq!(
        quantity(&rows, "Indigenous production_Crude Oil & NGLs", "202403"),
        Some(210.0)
    );
    assert_eq!(
        quantity(&rows, "Indigenous production_Crude Oil & NGLs", "202404"),
        Some(220.0)
    );
    assert!(!rows
        .iter()
        .any(|r| r["Sub_Category"] == "Indigenous production_Crude oil"
            || r["Sub_Category"] == "Indigenous production_NGLs"));

    assert_eq!(quantity(&rows, "Imports_Crude oil & NGLs", "202403"), Some(300.0));
    assert_eq!(quantity(&rows, "Exports_Feedstocks", "202404"), Some(10.0));
    assert_eq!(quantity(&rows, "Stock change", "202402"), Some(-5.0));
    assert_eq!(quantity(&rows, "Stock change", "202403"), None);

    // Per cent change column is not a quarter and is dropped
    assert!(rows.iter().all(|r| r["Quarter"].len() == 6));
}

#[tokio::test]
async fn test_reshape_latest_without_workbook() {
    let server = Server::new_async().await;
    let env = test_env(&server, "2024 1st quarter");

    let app = Application::build(env.config.clone()).unwrap();
    assert!(matches!(
        app.reshape_latest().await,
        Err(AppError::NoLocalSpreadsheet(_))
    ));
}
