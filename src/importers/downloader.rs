use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::retry::{RetryError, RetryPolicy, Transient};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP status {status} while downloading {url}")]
    Status { url: String, status: u16 },

    #[error("I/O error while storing download: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download of {url} failed after {attempts} attempts: {source}")]
    DownloadFailed {
        url: String,
        attempts: usize,
        #[source]
        source: Box<DownloadError>,
    },
}

impl Transient for DownloadError {
    /// Only failures below HTTP (connect, timeout, broken body) are retried
    fn is_transient(&self) -> bool {
        matches!(self, DownloadError::Network(_))
    }
}

/// Streams a spreadsheet to a staging file, then moves it into place
///
/// Staging lives in the scratch directory; the destination is only written
/// once the whole body has arrived, so a failed download never leaves a
/// partial file behind.
pub struct SpreadsheetDownloader {
    client: Client,
    staging_dir: PathBuf,
    retry: RetryPolicy,
    show_progress: bool,
}

impl SpreadsheetDownloader {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, DownloadError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            staging_dir: staging_dir.into(),
            retry,
            show_progress: false,
        })
    }

    /// Draw a progress bar while streaming (interactive runs)
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Download `url` to `destination`, retrying network failures
    ///
    /// Returns the number of bytes written.
    #[instrument(skip(self, url, destination), fields(url = %url, destination = %destination.display()))]
    pub async fn fetch_to(&self, url: &Url, destination: &Path) -> Result<u64, DownloadError> {
        let written = self
            .retry
            .run("download", |attempt| self.fetch_once(url, destination, attempt))
            .await
            .map_err(|e| match e {
                RetryError::Fatal(e) => e,
                RetryError::Exhausted {
                    attempts, source, ..
                } => DownloadError::DownloadFailed {
                    url: url.to_string(),
                    attempts,
                    source: Box::new(source),
                },
            })?;

        info!("Downloaded {} bytes to {}", written, destination.display());
        Ok(written)
    }

    async fn fetch_once(
        &self,
        url: &Url,
        destination: &Path,
        attempt: usize,
    ) -> Result<u64, DownloadError> {
        debug!(attempt, "Requesting {}", url);
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(attempt, status = status.as_u16(), "Download rejected by server");
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        fs::create_dir_all(&self.staging_dir)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.staging_dir)?;

        let progress = self.progress_bar(response.content_length());
        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            staged.write_all(&chunk)?;
            written += chunk.len() as u64;
            progress.set_position(written);
        }
        staged.flush()?;
        progress.finish_and_clear();

        relocate(staged, destination)?;
        Ok(written)
    }

    fn progress_bar(&self, length: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(length.unwrap_or(0));
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }
}

/// Move a finished staging file to its destination
///
/// A rename is tried first; across filesystems it falls back to a copy, and the
/// staging file is removed when it drops.
fn relocate(staged: NamedTempFile, destination: &Path) -> Result<(), DownloadError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    match staged.persist(destination) {
        Ok(_) => Ok(()),
        Err(e) => {
            debug!("Rename failed ({}), copying instead", e.error);
            fs::copy(e.file.path(), destination)?;
            Ok(())
        }
    }
}
