pub mod app;
pub mod config;
pub mod exporters;
pub mod fetch_error;
pub mod gate_state;
pub mod importers;
pub mod page_scanner;
pub mod quarter;
pub mod retry;
pub mod services;
