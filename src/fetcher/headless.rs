//! Headless Chromium renderer
//!
//! One browser process is launched per renderer; every navigation opens a
//! fresh page and closes it afterwards.

use crate::config::FetcherConfig;
use crate::fetcher::{FetchError, FetchTiming, RenderedPage, Renderer};
use async_trait::async_trait;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Navigation timing read from the page after load
const TTFB_SCRIPT: &str =
    "(() => { const t = performance.timing; return Math.max(0, t.responseStart - t.navigationStart); })()";

/// Renderer backed by a headless Chromium instance
pub struct HeadlessRenderer {
    browser: Mutex<Browser>,
    timeout: Duration,
    capture_screenshot: bool,
    events: JoinHandle<()>,
}

impl HeadlessRenderer {
    /// Launches the browser
    ///
    /// # Arguments
    ///
    /// * `config` - Fetcher configuration (timeout, screenshot capture)
    ///
    /// # Returns
    ///
    /// * `Ok(HeadlessRenderer)` - Browser is up
    /// * `Err(FetchError)` - Chromium could not be found or started
    pub async fn launch(config: &FetcherConfig) -> Result<Self, FetchError> {
        let browser_config = BrowserConfig::builder()
            .new_headless_mode()
            .args(vec![
                "--disable-gpu",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--remote-debugging-port=0",
            ])
            .build()
            .map_err(FetchError::Renderer)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| FetchError::Renderer(format!("failed to launch browser: {}", e)))?;

        // The CDP event loop must be driven for the browser to make progress
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!("Headless browser launched");

        Ok(Self {
            browser: Mutex::new(browser),
            timeout: config.navigation_timeout(),
            capture_screenshot: config.capture_screenshot,
            events,
        })
    }

    fn timeout_error(&self, url: &Url) -> FetchError {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

#[async_trait]
impl Renderer for HeadlessRenderer {
    fn name(&self) -> &'static str {
        "headless"
    }

    async fn render(&self, url: &Url) -> Result<RenderedPage, FetchError> {
        let started = Instant::now();

        let page = {
            let browser = self.browser.lock().await;
            tokio::time::timeout(self.timeout, browser.new_page(url.as_str()))
                .await
                .map_err(|_| self.timeout_error(url))?
                .map_err(|e| FetchError::Unreachable {
                    url: url.to_string(),
                    message: e.to_string(),
                })?
        };

        let remaining = self.timeout.saturating_sub(started.elapsed());
        let body = tokio::time::timeout(remaining, page.content())
            .await
            .map_err(|_| self.timeout_error(url))?
            .map_err(|e| FetchError::Interrupted {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let navigation_ms = started.elapsed().as_millis() as u64;

        let ttfb_ms = match page.evaluate(TTFB_SCRIPT).await {
            Ok(result) => result.into_value::<f64>().map(|v| v as u64).unwrap_or(0),
            Err(e) => {
                debug!(url = %url, error = %e, "Could not read navigation timing");
                0
            }
        };

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        let screenshot = if self.capture_screenshot {
            match page
                .screenshot(ScreenshotParams::builder().full_page(true).build())
                .await
            {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(url = %url, error = %e, "Screenshot capture failed");
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = page.close().await {
            debug!(url = %url, error = %e, "Failed to close page");
        }

        // The DevTools page API does not expose the main response status or
        // headers; a page that loaded is reported as 200
        Ok(RenderedPage {
            final_url,
            status_code: 200,
            content_type: Some("text/html".to_string()),
            headers: BTreeMap::new(),
            timing: FetchTiming {
                navigation_ms,
                ttfb_ms,
                content_length: body.len() as u64,
            },
            body,
            screenshot,
        })
    }
}

impl Drop for HeadlessRenderer {
    fn drop(&mut self) {
        self.events.abort();
    }
}
