use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::services::reshaper::LongRow;

pub const DEFAULT_OUTPUT_FILE: &str = "TransformedEnergyData.csv";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error while writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes the long table as a single comma-separated file with a header row
///
/// The file is written next to its destination and renamed over it, so an
/// existing output is replaced whole or not at all.
pub struct CsvExporter {
    path: PathBuf,
}

impl CsvExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, rows: &[LongRow]) -> Result<usize, ExportError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let staged = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        let mut writer = csv::Writer::from_writer(staged);

        if rows.is_empty() {
            writer.write_record([
                "Category",
                "Sub_Category",
                "Quarter",
                "Quantity",
                "FileName",
                "ProcessedDate",
            ])?;
        }
        for row in rows {
            writer.serialize(row)?;
        }

        let staged = writer
            .into_inner()
            .map_err(|e| self.io_error(std::io::Error::new(e.error().kind(), e.error().to_string())))?;
        staged
            .persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;

        info!("Wrote {} rows to {}", rows.len(), self.path.display());
        Ok(rows.len())
    }

    fn io_error(&self, source: std::io::Error) -> ExportError {
        ExportError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
