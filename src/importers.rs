// ! Spreadsheet acquisition and loading

pub mod downloader;
pub mod quarter_sheet;

// Re-export commonly used items
pub use downloader::{DownloadError, SpreadsheetDownloader};
pub use quarter_sheet::{Cell, QuarterSheetReader, SheetError, WideTable};
