use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::quarter::{QuarterLabel, QuarterParseError};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to access gate state at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored quarter is malformed: {0}")]
    Malformed(#[from] QuarterParseError),
}

/// Persistence for the single "latest known quarter" value
pub trait GateStateStore {
    /// `None` when nothing has been stored yet
    fn load(&self) -> Result<Option<QuarterLabel>, StateError>;

    fn save(&self, quarter: QuarterLabel) -> Result<(), StateError>;
}

/// Keeps the latest quarter as one line of text, e.g. `2024 2nd quarter`
#[derive(Debug, Clone)]
pub struct FileGateStateStore {
    path: PathBuf,
}

impl FileGateStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl GateStateStore for FileGateStateStore {
    fn load(&self) -> Result<Option<QuarterLabel>, StateError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => {
                let quarter = text.trim().parse::<QuarterLabel>()?;
                debug!(%quarter, "Loaded gate state from {}", self.path.display());
                Ok(Some(quarter))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, quarter: QuarterLabel) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        fs::write(&self.path, format!("{quarter}\n")).map_err(|e| self.io_error(e))?;
        info!(%quarter, "Saved gate state to {}", self.path.display());
        Ok(())
    }
}
