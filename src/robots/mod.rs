//! Robots.txt handling module
//!
//! This module fetches robots.txt next to an analyzed page and answers
//! allow/disallow questions about it for the SEO checks. Fetching is best
//! effort: any failure simply means "no robots.txt".

mod parser;

pub use parser::ParsedRobots;

use reqwest::Client;
use tracing::debug;
use url::Url;

/// Largest robots.txt body kept on the artifact (bytes)
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// Returns the robots.txt location for the origin of `page_url`
///
/// # Arguments
///
/// * `page_url` - Any URL on the site
///
/// # Returns
///
/// * `Some(Url)` - `<scheme>://<host>[:port]/robots.txt`
/// * `None` - The URL has no host
pub fn robots_url(page_url: &Url) -> Option<Url> {
    page_url.host_str()?;
    page_url.join("/robots.txt").ok()
}

/// Fetches robots.txt for the site of `page_url`
///
/// # Arguments
///
/// * `client` - HTTP client to fetch with
/// * `page_url` - The analyzed page
///
/// # Returns
///
/// * `Some(String)` - The robots.txt body
/// * `None` - Missing, non-2xx, not text, too large, or the fetch failed
pub async fn fetch_robots(client: &Client, page_url: &Url) -> Option<String> {
    let url = robots_url(page_url)?;

    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %url, error = %e, "robots.txt fetch failed");
            return None;
        }
    };

    if !response.status().is_success() {
        debug!(url = %url, status = response.status().as_u16(), "No robots.txt");
        return None;
    }

    let is_text = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().starts_with("text/"))
        .unwrap_or(true);
    if !is_text {
        debug!(url = %url, "robots.txt is not text, ignoring");
        return None;
    }

    match response.text().await {
        Ok(body) if body.len() <= MAX_ROBOTS_BYTES => Some(body),
        Ok(_) => {
            debug!(url = %url, "robots.txt too large, ignoring");
            None
        }
        Err(e) => {
            debug!(url = %url, error = %e, "robots.txt body could not be read");
            None
        }
    }
}
