use crate::config::FetcherConfig;
use crate::fetcher::{FetchArtifact, FetchError, Renderer};
use crate::queue::{JobFailure, JobKind, JobRecord, Store};
use crate::robots::fetch_robots;
use crate::state::ErrorCode;
use crate::worker::JobHandler;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Payload of a `fetch` job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPayload {
    /// Normalized URL to load
    pub url: String,
}

/// Handles `fetch` jobs: renders the page and publishes the artifact
pub struct FetchHandler {
    renderer: Arc<dyn Renderer>,
    client: Client,
    store: Arc<dyn Store>,
    max_retries: u32,
    retry_delay: Duration,
}

impl FetchHandler {
    /// Creates a fetch handler
    ///
    /// # Arguments
    ///
    /// * `renderer` - Renderer used for the page itself
    /// * `client` - Plain HTTP client used for robots.txt
    /// * `store` - Where artifacts are published
    /// * `config` - Retry settings
    pub fn new(
        renderer: Arc<dyn Renderer>,
        client: Client,
        store: Arc<dyn Store>,
        config: &FetcherConfig,
    ) -> Self {
        Self {
            renderer,
            client,
            store,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }

    /// Renders `url`, retrying transient failures
    ///
    /// At most `max_retries + 1` attempts are made. Only the last error is
    /// returned.
    async fn render_with_retries(&self, url: &Url) -> Result<crate::fetcher::RenderedPage, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.renderer.render(url).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    warn!(
                        url = %url,
                        attempt,
                        renderer = self.renderer.name(),
                        "Fetch failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl JobHandler for FetchHandler {
    fn kind(&self) -> JobKind {
        JobKind::Fetch
    }

    async fn handle(&self, job: &JobRecord) -> Result<serde_json::Value, JobFailure> {
        let payload: FetchPayload = serde_json::from_value(job.payload.clone()).map_err(|e| {
            JobFailure::new(ErrorCode::Internal, format!("bad fetch payload: {}", e))
        })?;
        let url = Url::parse(&payload.url).map_err(|e| {
            JobFailure::new(ErrorCode::Internal, format!("bad fetch url {}: {}", payload.url, e))
        })?;

        let page = self
            .render_with_retries(&url)
            .await
            .map_err(|e| JobFailure::new(e.code(), e.to_string()))?;

        let robots_txt = fetch_robots(&self.client, &url).await;
        let artifact = FetchArtifact::from_rendered(&job.request_id, url.as_str(), page, robots_txt);

        let summary = json!({
            "final_url": artifact.final_url,
            "status_code": artifact.status_code,
            "navigation_ms": artifact.timing.navigation_ms,
            "content_length": artifact.timing.content_length,
            "has_robots_txt": artifact.robots_txt.is_some(),
        });

        let published = self
            .store
            .put_artifact(&artifact)
            .map_err(|e| JobFailure::new(e.code(), e.to_string()))?;
        if published {
            info!(
                request_id = %job.request_id,
                url = %artifact.final_url,
                navigation_ms = artifact.timing.navigation_ms,
                "Artifact published"
            );
        } else {
            debug!(request_id = %job.request_id, "Artifact already published, keeping the first");
        }

        Ok(summary)
    }
}
