// ! Output writers for the long table

pub mod csv_exporter;

pub use csv_exporter::{CsvExporter, ExportError, DEFAULT_OUTPUT_FILE};
