use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::importers::quarter_sheet::{QuarterSheetReader, SheetError};
use crate::importers::{DownloadError, SpreadsheetDownloader};
use crate::quarter::QuarterLabel;

/// Result of inspecting a candidate release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub is_newer: bool,
    /// The file's newest quarter when newer, otherwise the last known one
    pub newest: QuarterLabel,
}

#[derive(Debug, thiserror::Error)]
enum InspectError {
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error("Workbook inspection task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Decides whether a published workbook carries a quarter newer than the one
/// already processed
///
/// The candidate is downloaded into the scratch directory under a name of its
/// own, so a scratch directory shared with the output directory never touches
/// a kept release. Its "Quarter" sheet header is inspected and the scratch copy
/// removed on every path. Inspection failures fail closed: they are logged and
/// reported as "not newer".
///
/// Quarter headers are strict. A header that starts like a quarter but carries
/// anything other than a bracketed note after it (`2024 1st quarter (p)`) is an
/// inspection failure, so that release stays closed until the header is fixed.
pub struct QuarterGate<'a> {
    downloader: &'a SpreadsheetDownloader,
    scratch_dir: PathBuf,
}

impl<'a> QuarterGate<'a> {
    pub fn new(downloader: &'a SpreadsheetDownloader, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloader,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Download failures (retries exhausted, HTTP error status) are returned;
    /// anything that goes wrong while reading the workbook is not.
    #[instrument(skip_all, fields(url = %url, file_name = %file_name, last_known = %last_known))]
    pub async fn evaluate(
        &self,
        url: &Url,
        file_name: &str,
        last_known: QuarterLabel,
    ) -> Result<GateDecision, DownloadError> {
        let scratch = ScratchFile::reserve(&self.scratch_dir, file_name)?;
        info!(
            "Downloading workbook to {} for inspection",
            scratch.path().display()
        );

        self.downloader.fetch_to(url, scratch.path()).await?;

        let decision = match inspect(scratch.path()).await {
            Ok(newest) => {
                info!(%newest, "Latest quarter in the file");
                decide(newest, last_known)
            }
            Err(InspectError::Sheet(SheetError::Quarter(e))) => {
                warn!(
                    file_name,
                    error = %e,
                    "Quarter header rejected, treating as not newer until it parses"
                );
                GateDecision {
                    is_newer: false,
                    newest: last_known,
                }
            }
            Err(e) => {
                error!(file_name, error = %e, "Error during workbook inspection, treating as not newer");
                GateDecision {
                    is_newer: false,
                    newest: last_known,
                }
            }
        };

        if decision.is_newer {
            info!(newest = %decision.newest, "Newer quarter found");
        } else {
            info!("No newer data found");
        }

        drop(scratch);
        Ok(decision)
    }
}

/// Pure comparison half of the gate
pub fn decide(newest_in_file: QuarterLabel, last_known: QuarterLabel) -> GateDecision {
    if newest_in_file > last_known {
        GateDecision {
            is_newer: true,
            newest: newest_in_file,
        }
    } else {
        GateDecision {
            is_newer: false,
            newest: last_known,
        }
    }
}

async fn inspect(path: &Path) -> Result<QuarterLabel, InspectError> {
    let reader = QuarterSheetReader::new(path);
    let newest = tokio::task::spawn_blocking(move || reader.read()?.newest_quarter()).await??;
    Ok(newest)
}

/// Removes its file when dropped, whether or not the file was ever written
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Claim a fresh `.inspect-XXXXXX-<file_name>` in `dir`
    ///
    /// The file name stays last so the workbook extension is kept.
    fn reserve(dir: &Path, file_name: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = tempfile::Builder::new()
            .prefix(".inspect-")
            .suffix(&format!("-{file_name}"))
            .tempfile_in(dir)?
            .into_temp_path()
            .keep()?;
        Ok(Self::new(path))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Removed scratch file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
