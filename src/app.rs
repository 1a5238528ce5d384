use chrono::{Local, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::exporters::{CsvExporter, ExportError};
use crate::fetch_error::FetchError;
use crate::gate_state::{FileGateStateStore, GateStateStore, StateError};
use crate::importers::{DownloadError, QuarterSheetReader, SheetError, SpreadsheetDownloader};
use crate::page_scanner::{file_name_from_url, PageScanner};
use crate::quarter::QuarterLabel;
use crate::services::quarter_gate::{GateDecision, QuarterGate};
use crate::services::reshaper::{ReshapeError, Reshaper, SheetLayout};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Listing page fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Failed to read spreadsheet: {0}")]
    Sheet(#[from] SheetError),

    #[error("Failed to reshape spreadsheet: {0}")]
    Reshape(#[from] ReshapeError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Spreadsheet URL has no file name: {0}")]
    NoFileName(String),

    #[error("No spreadsheet found in {0}")]
    NoLocalSpreadsheet(String),

    #[error("Failed to list {path}: {source}")]
    ListDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A spreadsheet found on the listing page
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: Url,
    pub file_name: String,
}

/// Outcome of checking the listing page without downloading for keeps
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    NoSpreadsheet,
    Checked {
        candidate: Candidate,
        decision: GateDecision,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReshapeReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Phrase or link missing from the listing page
    NoSpreadsheet,
    UpToDate { latest: QuarterLabel },
    Updated {
        newest: QuarterLabel,
        spreadsheet: PathBuf,
        report: ReshapeReport,
    },
}

/// One batch run: scan, gate, download, reshape, export
///
/// Everything runs sequentially. The gate state is read once when the gate is
/// evaluated and written once, after the new release has been exported.
pub struct Application {
    config: Config,
    scanner: PageScanner,
    downloader: SpreadsheetDownloader,
    state: Box<dyn GateStateStore + Send + Sync>,
}

impl Application {
    pub fn build(config: Config) -> Result<Self, AppError> {
        let state = FileGateStateStore::new(config.state_file.clone());
        Self::with_state_store(config, Box::new(state))
    }

    pub fn with_state_store(
        config: Config,
        state: Box<dyn GateStateStore + Send + Sync>,
    ) -> Result<Self, AppError> {
        let scanner = PageScanner::new(config.http_timeout)?;
        let downloader = SpreadsheetDownloader::new(
            config.scratch_dir.clone(),
            config.retry.clone(),
            config.http_timeout,
        )?;
        Ok(Self {
            config,
            scanner,
            downloader,
            state,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.downloader = self.downloader.with_progress(show_progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stored quarter, or the configured one when nothing is stored yet
    ///
    /// When both exist the later one wins, so raising the configured quarter
    /// skips releases even after state has been written.
    pub fn last_known_quarter(&self) -> Result<QuarterLabel, AppError> {
        let configured = self.config.last_known_quarter;
        Ok(match self.state.load()? {
            Some(stored) => stored.max(configured),
            None => configured,
        })
    }

    /// Scan the listing page and run the gate; nothing is kept on disk
    #[instrument(skip(self), fields(page_url = %self.config.page_url))]
    pub async fn check(&self) -> Result<CheckOutcome, AppError> {
        let Some(candidate) = self.find_candidate().await? else {
            return Ok(CheckOutcome::NoSpreadsheet);
        };

        let last_known = self.last_known_quarter()?;
        let gate = QuarterGate::new(&self.downloader, &self.config.scratch_dir);
        let decision = gate
            .evaluate(&candidate.url, &candidate.file_name, last_known)
            .await?;

        Ok(CheckOutcome::Checked {
            candidate,
            decision,
        })
    }

    /// Full batch: download the release when newer, reshape it, write the
    /// long table, then record the new quarter
    #[instrument(skip(self), fields(page_url = %self.config.page_url))]
    pub async fn run(&self) -> Result<RunOutcome, AppError> {
        let (candidate, decision) = match self.check().await? {
            CheckOutcome::NoSpreadsheet => {
                info!("No spreadsheet to evaluate, nothing to do");
                return Ok(RunOutcome::NoSpreadsheet);
            }
            CheckOutcome::Checked {
                candidate,
                decision,
            } => (candidate, decision),
        };

        if !decision.is_newer {
            info!(
                latest = %decision.newest,
                "The workbook does not contain newer quarters, no download will be performed"
            );
            return Ok(RunOutcome::UpToDate {
                latest: decision.newest,
            });
        }

        info!(newest = %decision.newest, "Newer data available, downloading release");
        let spreadsheet = self.config.output_dir.join(&candidate.file_name);
        self.downloader.fetch_to(&candidate.url, &spreadsheet).await?;

        let report = self.reshape_file(&spreadsheet).await?;
        self.state.save(decision.newest)?;

        Ok(RunOutcome::Updated {
            newest: decision.newest,
            spreadsheet,
            report,
        })
    }

    /// Reshape the most recently modified workbook in the output directory
    pub async fn reshape_latest(&self) -> Result<ReshapeReport, AppError> {
        let dir = &self.config.output_dir;
        let latest = latest_spreadsheet(dir)
            .map_err(|source| AppError::ListDir {
                path: dir.display().to_string(),
                source,
            })?
            .ok_or_else(|| AppError::NoLocalSpreadsheet(dir.display().to_string()))?;

        info!("Most recently modified spreadsheet: {}", latest.display());
        self.reshape_file(&latest).await
    }

    /// Read a local workbook and write its long table to the output file
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn reshape_file(&self, path: &Path) -> Result<ReshapeReport, AppError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let reader = QuarterSheetReader::new(path);
        let table = tokio::task::spawn_blocking(move || reader.read()).await??;

        let reshaper = Reshaper::new(SheetLayout::energy_trends(), self.config.layout_check);
        let rows = reshaper.reshape(&table, &file_name, processed_date())?;

        let output = self.config.output_path();
        let written = CsvExporter::new(&output).write(&rows)?;

        Ok(ReshapeReport {
            source: path.to_path_buf(),
            output,
            rows: written,
        })
    }

    async fn find_candidate(&self) -> Result<Option<Candidate>, AppError> {
        let url = self
            .scanner
            .find_spreadsheet_url(&self.config.page_url, &self.config.search_phrase)
            .await?;

        let Some(url) = url else {
            return Ok(None);
        };

        let file_name =
            file_name_from_url(&url).ok_or_else(|| AppError::NoFileName(url.to_string()))?;
        info!(%url, file_name, "Spreadsheet candidate");

        Ok(Some(Candidate { url, file_name }))
    }
}

fn processed_date() -> NaiveDate {
    Local::now().date_naive()
}

/// Newest `.xls`/`.xlsx` in `dir` by modification time
pub fn latest_spreadsheet(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let is_workbook = path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                ext == "xls" || ext == "xlsx"
            })
            .unwrap_or(false);
        if !is_workbook || !path.is_file() {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Cannot read modification time of {}: {}", path.display(), e);
                continue;
            }
        };
        debug!("Candidate workbook {}", path.display());

        if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
            latest = Some((modified, path));
        }
    }

    Ok(latest.map(|(_, path)| path))
}
