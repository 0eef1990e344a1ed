//! Plain HTTP renderer
//!
//! Loads pages with a single GET, following redirects, without executing
//! scripts. The client is built once; each request carries no cookie jar, so
//! fetches stay isolated from one another.

use crate::config::FetcherConfig;
use crate::fetcher::{FetchError, FetchTiming, RenderedPage, Renderer};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Most redirects followed before giving up
const MAX_REDIRECTS: usize = 10;

/// Response headers kept on the artifact
const KEPT_HEADERS: &[&str] = &[
    "cache-control",
    "content-language",
    "content-length",
    "content-security-policy",
    "content-type",
    "etag",
    "expires",
    "last-modified",
    "server",
    "strict-transport-security",
    "x-robots-tag",
];

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The fetcher configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use pagescope::config::FetcherConfig;
/// use pagescope::fetcher::build_http_client;
///
/// let client = build_http_client(&FetcherConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &FetcherConfig) -> Result<Client, reqwest::Error> {
    let timeout = config.navigation_timeout();

    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Renderer backed by `reqwest`
pub struct HttpRenderer {
    client: Client,
    timeout: Duration,
}

impl HttpRenderer {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let client =
            build_http_client(config).map_err(|e| FetchError::Renderer(e.to_string()))?;
        Ok(Self {
            client,
            timeout: config.navigation_timeout(),
        })
    }

    /// Classifies a transport error
    fn classify(&self, url: &Url, error: reqwest::Error) -> FetchError {
        let url = url.to_string();
        if error.is_timeout() {
            FetchError::Timeout {
                url,
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if error.is_redirect() {
            FetchError::RedirectLimit { url }
        } else if error.is_connect() {
            FetchError::Unreachable {
                url,
                message: error.to_string(),
            }
        } else if error.is_body() || error.is_decode() {
            FetchError::Interrupted {
                url,
                message: error.to_string(),
            }
        } else {
            FetchError::Unreachable {
                url,
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn render(&self, url: &Url) -> Result<RenderedPage, FetchError> {
        let started = Instant::now();

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;
        let ttfb_ms = started.elapsed().as_millis() as u64;

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: final_url,
                status: status.as_u16(),
            });
        }

        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter(|(name, _)| KEPT_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let content_type = headers.get("content-type").cloned();

        let body = response.text().await.map_err(|e| self.classify(url, e))?;
        let navigation_ms = started.elapsed().as_millis() as u64;

        debug!(
            url = %final_url,
            status = status.as_u16(),
            ttfb_ms,
            navigation_ms,
            bytes = body.len(),
            "Rendered page over HTTP"
        );

        Ok(RenderedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            headers,
            timing: FetchTiming {
                navigation_ms,
                ttfb_ms,
                content_length: body.len() as u64,
            },
            body,
            screenshot: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&FetcherConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_renderer_keeps_timeout() {
        let config = FetcherConfig {
            navigation_timeout_ms: 1_500,
            ..FetcherConfig::default()
        };
        let renderer = HttpRenderer::new(&config).unwrap();
        assert_eq!(renderer.timeout, Duration::from_millis(1_500));
        assert_eq!(renderer.name(), "http");
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        // Port 9 (discard) on localhost is closed in test environments
        let config = FetcherConfig {
            navigation_timeout_ms: 2_000,
            ..FetcherConfig::default()
        };
        let renderer = HttpRenderer::new(&config).unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();

        let err = renderer.render(&url).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.code().is_fetch_error());
    }
}
