use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::exporters::DEFAULT_OUTPUT_FILE;
use crate::quarter::{QuarterLabel, QuarterParseError};
use crate::retry::RetryPolicy;
use crate::services::reshaper::LayoutCheck;

pub const DEFAULT_PAGE_URL: &str =
    "https://www.gov.uk/government/statistics/oil-and-oil-products-section-3-energy-trends";
pub const DEFAULT_SEARCH_PHRASE: &str = "Supply and use of crude oil";
pub const DEFAULT_LAST_KNOWN_QUARTER: &str = "1984 1st quarter";
const STATE_FILE_NAME: &str = "latest_quarter.txt";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ENERGY_LAST_KNOWN_QUARTER is not a quarter label: {0}")]
    LastKnownQuarter(#[from] QuarterParseError),

    #[error("ENERGY_LAYOUT_CHECK must be 'strict' or 'warn', got {0:?}")]
    LayoutCheck(String),

    #[error("ENERGY_RETRY_BACKOFF must be a finite number, got {0}")]
    RetryBackoffNotFinite(f32),

    #[error("ENERGY_RETRY_BACKOFF must be at least 1.0, got {0}")]
    RetryBackoffBelowOne(f32),

    #[error("ENERGY_RETRY_DELAY_SECS of {delay_secs}s overflows after {attempts} attempts with backoff {backoff}")]
    RetryDelayOverflow {
        delay_secs: u64,
        attempts: usize,
        backoff: f32,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub page_url: String,
    pub search_phrase: String,
    pub last_known_quarter: QuarterLabel,
    pub output_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub state_file: PathBuf,
    pub output_file_name: String,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    pub layout_check: LayoutCheck,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let output_dir = PathBuf::from(var("ENERGY_OUTPUT_DIR", "data"));
        let state_file = lookup("ENERGY_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| output_dir.join(STATE_FILE_NAME));

        let layout_check = match var("ENERGY_LAYOUT_CHECK", "strict").to_lowercase().as_str() {
            "strict" => LayoutCheck::Strict,
            "warn" => LayoutCheck::Warn,
            other => return Err(ConfigError::LayoutCheck(other.to_string())),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            var("ENERGY_MAX_RETRIES", "3")
                .parse()
                .unwrap_or(defaults.max_attempts),
            Duration::from_secs(
                var("ENERGY_RETRY_DELAY_SECS", "5")
                    .parse()
                    .unwrap_or(defaults.initial_delay.as_secs()),
            ),
            var("ENERGY_RETRY_BACKOFF", "2.0")
                .parse()
                .unwrap_or(defaults.backoff),
        );
        check_retry(&retry)?;

        Ok(Config {
            page_url: var("ENERGY_PAGE_URL", DEFAULT_PAGE_URL),
            search_phrase: var("ENERGY_SEARCH_PHRASE", DEFAULT_SEARCH_PHRASE),
            last_known_quarter: var("ENERGY_LAST_KNOWN_QUARTER", DEFAULT_LAST_KNOWN_QUARTER)
                .parse()?,
            scratch_dir: lookup("ENERGY_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            output_dir,
            state_file,
            output_file_name: var("ENERGY_OUTPUT_FILE_NAME", DEFAULT_OUTPUT_FILE),
            http_timeout: Duration::from_secs(
                var("ENERGY_HTTP_TIMEOUT_SECS", "10").parse().unwrap_or(10),
            ),
            retry,
            layout_check,
        })
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file_name)
    }
}

/// The backoff schedule must grow and every delay in it must fit a `Duration`
fn check_retry(retry: &RetryPolicy) -> Result<(), ConfigError> {
    if !retry.backoff.is_finite() {
        return Err(ConfigError::RetryBackoffNotFinite(retry.backoff));
    }
    if retry.backoff < 1.0 {
        return Err(ConfigError::RetryBackoffBelowOne(retry.backoff));
    }
    if retry.largest_delay().is_none() {
        return Err(ConfigError::RetryDelayOverflow {
            delay_secs: retry.initial_delay.as_secs(),
            attempts: retry.max_attempts,
            backoff: retry.backoff,
        });
    }
    Ok(())
}
