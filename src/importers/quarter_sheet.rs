use calamine::{open_workbook_auto, Data, Range, Reader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::quarter::{is_quarter_column, QuarterLabel, QuarterParseError};

/// Worksheet holding the quarterly series
pub const QUARTER_SHEET: &str = "Quarter";

/// Rows above the header (title, notes, units) that are skipped
pub const HEADER_OFFSET: u32 = 4;

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Failed to open workbook {path}: {msg}")]
    WorkbookOpen { path: String, msg: String },

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Sheet is empty")]
    EmptySheet,

    #[error("No header row at row {0}")]
    MissingHeader(u32),

    #[error("No quarter columns in header")]
    NoQuarterColumns,

    #[error("Bad quarter column: {0}")]
    Quarter(#[from] QuarterParseError),
}

/// One cell of the wide table
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    /// Numeric view; suppressed markers such as `[x]` read as missing
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
            Cell::Empty => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
            Cell::Empty => String::new(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
            Cell::Empty => true,
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::String(s) => Cell::Text(s.clone()),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::Empty | Data::Error(_) => Cell::Empty,
            other => Cell::Text(other.to_string()),
        }
    }
}

/// The "Quarter" sheet as loaded: a header row and the data rows under it
///
/// Rows keep their sheet order; a row's index in `rows` is its ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl WideTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    /// Build from a worksheet range, skipping [`HEADER_OFFSET`] rows
    ///
    /// Columns with an empty header are dropped, as are rows with no data.
    pub fn from_range(range: &Range<Data>) -> Result<Self, SheetError> {
        let (start, end) = match (range.start(), range.end()) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(SheetError::EmptySheet),
        };

        if end.0 < HEADER_OFFSET {
            return Err(SheetError::MissingHeader(HEADER_OFFSET));
        }

        let cell_at = |row: u32, col: u32| -> Cell {
            range
                .get_value((row, col))
                .map(Cell::from)
                .unwrap_or(Cell::Empty)
        };

        let mut kept = Vec::new();
        let mut columns = Vec::new();
        for col in start.1..=end.1 {
            let header = normalize_header(&cell_at(HEADER_OFFSET, col).as_text());
            if header.is_empty() {
                debug!("Dropping column {} with empty header", col);
                continue;
            }
            kept.push(col);
            columns.push(header);
        }

        if columns.is_empty() {
            return Err(SheetError::MissingHeader(HEADER_OFFSET));
        }

        let mut rows = Vec::new();
        for row in (HEADER_OFFSET + 1)..=end.0 {
            let cells: Vec<Cell> = kept.iter().map(|&col| cell_at(row, col)).collect();
            if cells.iter().all(Cell::is_empty) {
                continue;
            }
            rows.push(cells);
        }

        debug!(
            "Loaded {} columns and {} rows below header",
            columns.len(),
            rows.len()
        );
        Ok(Self { columns, rows })
    }

    /// Headers that name a quarter, as written in the sheet
    pub fn quarter_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| is_quarter_column(c))
    }

    /// Latest quarter named in the header row
    ///
    /// Any quarter-shaped header that fails to parse is an error rather than
    /// being skipped.
    pub fn newest_quarter(&self) -> Result<QuarterLabel, SheetError> {
        let mut newest: Option<QuarterLabel> = None;
        for column in self.quarter_columns() {
            let label = QuarterLabel::from_header(column)?;
            newest = newest.max(Some(label));
        }
        newest.ok_or(SheetError::NoQuarterColumns)
    }
}

/// Trim and fold embedded line breaks into spaces
pub fn normalize_header(raw: &str) -> String {
    raw.trim().replace("\r\n", " ").replace('\n', " ")
}

/// Reader for the "Quarter" sheet of a release workbook (.xls or .xlsx)
pub struct QuarterSheetReader {
    workbook_path: PathBuf,
}

impl QuarterSheetReader {
    pub fn new(workbook_path: impl Into<PathBuf>) -> Self {
        Self {
            workbook_path: workbook_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.workbook_path
    }

    /// Open the workbook and load the sheet (synchronous, callers in async
    /// context should use `spawn_blocking`)
    pub fn read(&self) -> Result<WideTable, SheetError> {
        info!("Reading {} sheet from {}", QUARTER_SHEET, self.workbook_path.display());

        let mut workbook =
            open_workbook_auto(&self.workbook_path).map_err(|e| SheetError::WorkbookOpen {
                path: self.workbook_path.display().to_string(),
                msg: e.to_string(),
            })?;

        let range = workbook
            .worksheet_range(QUARTER_SHEET)
            .map_err(|_| SheetError::SheetNotFound(QUARTER_SHEET.to_string()))?;

        WideTable::from_range(&range)
    }
}
