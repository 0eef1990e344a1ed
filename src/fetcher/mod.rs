//! Fetcher module
//!
//! This module retrieves target pages for the pipeline:
//! - A `Renderer` abstraction over plain HTTP and headless Chromium
//! - Error classification into timeout, unreachable and HTTP failures
//! - The `FetchArtifact` every analysis worker reads
//! - The fetch job handler with bounded retries

mod artifact;
#[cfg(feature = "headless")]
mod headless;
mod http;
mod worker;

pub use artifact::{FetchArtifact, FetchTiming};
#[cfg(feature = "headless")]
pub use headless::HeadlessRenderer;
pub use http::{build_http_client, HttpRenderer};
pub use worker::{FetchHandler, FetchPayload};

use crate::config::{FetcherConfig, RendererKind};
use crate::state::ErrorCode;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors that can occur while rendering a page
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Navigation to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Could not reach {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("Connection to {url} dropped: {message}")]
    Interrupted { url: String, message: String },

    #[error("{url} responded with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Too many redirects from {url}")]
    RedirectLimit { url: String },

    #[error("Renderer error: {0}")]
    Renderer(String),
}

impl FetchError {
    /// Returns true if another attempt may succeed
    ///
    /// Timeouts, refused/failed connections and truncated bodies are retried;
    /// HTTP error statuses and redirect loops are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Unreachable { .. } | Self::Interrupted { .. }
        )
    }

    /// Maps this error onto the wire-level error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::FetchTimeout,
            Self::Unreachable { .. } | Self::Interrupted { .. } => ErrorCode::FetchUnreachable,
            Self::HttpStatus { .. } | Self::RedirectLimit { .. } => ErrorCode::FetchHttpError,
            Self::Renderer(_) => ErrorCode::Internal,
        }
    }
}

/// What a renderer hands back for one navigation
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    /// URL after redirects
    pub final_url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    /// Response headers with lowercase names
    pub headers: BTreeMap<String, String>,
    /// Serialized DOM
    pub body: String,
    pub screenshot: Option<Vec<u8>>,
    pub timing: FetchTiming,
}

/// A way of loading a page
///
/// Each call must use an isolated context: no cookies or storage leak
/// between fetches.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Loads `url` once, without retrying
    async fn render(&self, url: &Url) -> Result<RenderedPage, FetchError>;
}

/// Builds the renderer selected in configuration
///
/// # Arguments
///
/// * `config` - Fetcher configuration
///
/// # Returns
///
/// * `Ok(Arc<dyn Renderer>)` - Ready renderer
/// * `Err(FetchError)` - The renderer could not start
pub async fn build_renderer(config: &FetcherConfig) -> Result<Arc<dyn Renderer>, FetchError> {
    match config.renderer {
        RendererKind::Http => Ok(Arc::new(HttpRenderer::new(config)?)),
        #[cfg(feature = "headless")]
        RendererKind::Headless => Ok(Arc::new(HeadlessRenderer::launch(config).await?)),
        #[cfg(not(feature = "headless"))]
        RendererKind::Headless => Err(FetchError::Renderer(
            "this build does not include the headless renderer".to_string(),
        )),
    }
}
