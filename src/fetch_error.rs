#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
