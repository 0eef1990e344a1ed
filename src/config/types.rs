use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for Pagescope
///
/// Every section and field has a default, so an empty file is a valid
/// configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub fetcher: FetcherConfig,
    pub workers: WorkerConfig,
    pub pipeline: PipelineConfig,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the API binds to
    pub listen: String,

    /// How long the analyze endpoint waits for a terminal state (milliseconds)
    #[serde(rename = "max-wait-ms")]
    pub max_wait_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".to_string(),
            max_wait_ms: 90_000,
        }
    }
}

impl ServerConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Path to the SQLite database file, or `:memory:`
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// How long a claimed job stays leased to its worker (milliseconds)
    #[serde(rename = "lease-ms")]
    pub lease_ms: u64,

    /// Fallback poll interval for idle workers (milliseconds)
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Claims allowed before an expired job is failed with `LeaseExpired`
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_path: "./pagescope.db".to_string(),
            lease_ms: 90_000,
            poll_interval_ms: 250,
            max_attempts: 3,
        }
    }
}

impl QueueConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which renderer the fetcher drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Plain HTTP GET, no script execution
    #[default]
    Http,
    /// Headless Chromium (requires the `headless` feature)
    Headless,
}

/// Fetcher worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Upper bound on one navigation, body included (milliseconds)
    #[serde(rename = "navigation-timeout-ms")]
    pub navigation_timeout_ms: u64,

    /// Retries after the first attempt for transient failures
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Pause between retries (milliseconds)
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    pub renderer: RendererKind,

    /// Capture a full-page screenshot (headless renderer only)
    #[serde(rename = "capture-screenshot")]
    pub capture_screenshot: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Pagescope/{}", env!("CARGO_PKG_VERSION")),
            navigation_timeout_ms: 20_000,
            max_retries: 2,
            retry_delay_ms: 500,
            renderer: RendererKind::Http,
            capture_screenshot: false,
        }
    }
}

impl FetcherConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Longest a single fetch job can run: every attempt timing out, the
    /// pauses between them, then robots.txt on the last attempt's success
    pub fn worst_case_fetch_ms(&self) -> u64 {
        let retries = u64::from(self.max_retries);
        (retries + 2)
            .saturating_mul(self.navigation_timeout_ms)
            .saturating_add(retries.saturating_mul(self.retry_delay_ms))
    }
}

/// Worker pool sizes per job kind
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub fetch: usize,
    pub accessibility: usize,
    pub seo: usize,
    pub performance: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            fetch: 2,
            accessibility: 2,
            seo: 2,
            performance: 2,
        }
    }
}

/// Master worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// A request still active after this long fails with `RequestTimeout`
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,

    /// Fallback interval between master passes (milliseconds)
    #[serde(rename = "tick-interval-ms")]
    pub tick_interval_ms: u64,

    /// Terminal requests older than this are purged (seconds)
    #[serde(rename = "report-ttl-secs")]
    pub report_ttl_secs: u64,

    pub weights: ScoreWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 120_000,
            tick_interval_ms: 500,
            report_ttl_secs: 3_600,
            weights: ScoreWeights::default(),
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn report_ttl(&self) -> Duration {
        Duration::from_secs(self.report_ttl_secs)
    }
}

/// Per-domain weights for the overall score
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub accessibility: f64,
    pub seo: f64,
    pub performance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            accessibility: 0.4,
            seo: 0.3,
            performance: 0.3,
        }
    }
}
