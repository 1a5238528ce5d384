use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fetch_error::FetchError;

/// Finds the spreadsheet download on a statistics listing page
///
/// The page is fetched once (no retries); the phrase search is case-insensitive
/// over every text node, and the first `.xls`/`.xlsx` hyperlink in document
/// order wins.
#[derive(Clone)]
pub struct PageScanner {
    client: reqwest::Client,
}

impl PageScanner {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    #[instrument(skip(self), fields(url = %page_url))]
    pub async fn find_spreadsheet_url(
        &self,
        page_url: &str,
        search_phrase: &str,
    ) -> Result<Option<Url>, FetchError> {
        let base = Url::parse(page_url)?;

        info!("Fetching listing page");
        let response = self.client.get(base.clone()).send().await?;
        let status = response.status();
        debug!("Received HTTP response with status: {}", status);

        if !status.is_success() {
            warn!(status = status.as_u16(), "Failed to retrieve the listing page");
            return Err(FetchError::Status {
                url: page_url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response.text().await?;
        debug!("Retrieved HTML content, size: {} bytes", html.len());

        Ok(locate_spreadsheet(&html, &base, search_phrase))
    }
}

/// Pure part of the scan: phrase match, then first spreadsheet link resolved
/// against `base`
pub fn locate_spreadsheet(html: &str, base: &Url, search_phrase: &str) -> Option<Url> {
    let document = Html::parse_document(html);

    if !contains_phrase(&document, search_phrase) {
        warn!(search_phrase, "No results found for the search phrase");
        return None;
    }
    info!(search_phrase, "Found relevant section");

    let link_selector = Selector::parse("a[href]").unwrap();
    let href = document
        .select(&link_selector)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| is_spreadsheet_href(href));

    let Some(href) = href else {
        warn!("No spreadsheet link found on the page");
        return None;
    };

    match base.join(href.trim()) {
        Ok(url) => {
            info!(%url, "Spreadsheet link found");
            Some(url)
        }
        Err(e) => {
            warn!(href, error = %e, "Spreadsheet link could not be resolved");
            None
        }
    }
}

fn contains_phrase(document: &Html, search_phrase: &str) -> bool {
    let needle = search_phrase.to_lowercase();
    document
        .root_element()
        .text()
        .any(|text| text.to_lowercase().contains(&needle))
}

/// `.xls` or `.xlsx` at the end of the path, ignoring query and fragment
fn is_spreadsheet_href(href: &str) -> bool {
    let path = href
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    path.ends_with(".xls") || path.ends_with(".xlsx")
}

/// Last path segment of a spreadsheet URL, used as its storage name
pub fn file_name_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
