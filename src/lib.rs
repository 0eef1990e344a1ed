//! Pagescope: a multi-worker site analysis pipeline
//!
//! This crate accepts a site URL, fetches the page once, fans the rendered
//! artifact out to accessibility, SEO and performance workers through a
//! durable job queue, and aggregates their findings into a scored report.

pub mod analysis;
pub mod api;
pub mod config;
pub mod fetcher;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod robots;
pub mod state;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for Pagescope operations
#[derive(Debug, Error)]
pub enum PagescopeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Invalid report type: {0}")]
    InvalidReportType(String),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetcher::FetchError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] analysis::AnalysisError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PagescopeError {
    /// Maps this error onto the wire-level error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UrlError(_) => ErrorCode::InvalidUrl,
            Self::InvalidReportType(_) => ErrorCode::InvalidReportType,
            Self::Queue(e) => e.code(),
            Self::Fetch(e) => e.code(),
            Self::Analysis(e) => e.code(),
            _ => ErrorCode::Internal,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid address in config: {0}")]
    InvalidAddress(String),
}

/// URL-specific errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("URL is empty")]
    Empty,

    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Host is not resolvable: {0}")]
    UnresolvableHost(String),

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Pagescope operations
pub type Result<T> = std::result::Result<T, PagescopeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::{Pipeline, Report, ReportType};
pub use state::{ErrorCode, JobState, RequestStatus};
pub use url::{extract_domain, normalize_site_url, NormalizedUrl};
