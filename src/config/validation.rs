use crate::config::types::{
    Config, FetcherConfig, PipelineConfig, QueueConfig, RendererKind, ScoreWeights, ServerConfig,
    WorkerConfig,
};
use crate::ConfigError;
use std::net::SocketAddr;

/// Largest pool a single job kind may run
const MAX_POOL_SIZE: usize = 64;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_server_config(&config.server)?;
    validate_queue_config(&config.queue)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_worker_config(&config.workers)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_timing(config)?;
    Ok(())
}

/// Checks the lease and every wait against the longest possible fetch
fn validate_timing(config: &Config) -> Result<(), ConfigError> {
    let fetch_ms = config.fetcher.worst_case_fetch_ms();

    if config.queue.lease_ms <= fetch_ms {
        return Err(ConfigError::Validation(format!(
            "lease_ms ({}) must exceed the longest fetch ({}ms: {} retries of {}ms plus robots.txt)",
            config.queue.lease_ms,
            fetch_ms,
            config.fetcher.max_retries,
            config.fetcher.navigation_timeout_ms
        )));
    }

    if config.pipeline.request_timeout_ms < fetch_ms {
        return Err(ConfigError::Validation(format!(
            "request_timeout_ms ({}) must be >= the longest fetch ({}ms)",
            config.pipeline.request_timeout_ms, fetch_ms
        )));
    }

    if config.server.max_wait_ms < fetch_ms {
        return Err(ConfigError::Validation(format!(
            "max_wait_ms ({}) must be >= the longest fetch ({}ms)",
            config.server.max_wait_ms, fetch_ms
        )));
    }

    Ok(())
}

/// Validates server configuration
fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    config.listen.parse::<SocketAddr>().map_err(|e| {
        ConfigError::InvalidAddress(format!("Invalid listen address '{}': {}", config.listen, e))
    })?;

    if config.max_wait_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "max_wait_ms must be >= 100ms, got {}ms",
            config.max_wait_ms
        )));
    }

    Ok(())
}

/// Validates queue configuration
fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.lease_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "lease_ms must be >= 100ms, got {}ms",
            config.lease_ms
        )));
    }

    if config.poll_interval_ms < 10 || config.poll_interval_ms > 60_000 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be between 10 and 60000, got {}",
            config.poll_interval_ms
        )));
    }

    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    Ok(())
}

/// Validates fetcher configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.navigation_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "navigation_timeout_ms must be >= 100ms, got {}ms",
            config.navigation_timeout_ms
        )));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    if config.renderer == RendererKind::Headless && !cfg!(feature = "headless") {
        return Err(ConfigError::Validation(
            "renderer = \"headless\" requires building with the `headless` feature".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker pool sizes
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    let pools = [
        ("fetch", config.fetch),
        ("accessibility", config.accessibility),
        ("seo", config.seo),
        ("performance", config.performance),
    ];

    for (name, size) in pools {
        if size < 1 || size > MAX_POOL_SIZE {
            return Err(ConfigError::Validation(format!(
                "workers.{} must be between 1 and {}, got {}",
                name, MAX_POOL_SIZE, size
            )));
        }
    }

    Ok(())
}

/// Validates master worker configuration
fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.tick_interval_ms < 10 || config.tick_interval_ms > 60_000 {
        return Err(ConfigError::Validation(format!(
            "tick_interval_ms must be between 10 and 60000, got {}",
            config.tick_interval_ms
        )));
    }

    if config.report_ttl_secs < 1 {
        return Err(ConfigError::Validation(
            "report_ttl_secs must be >= 1".to_string(),
        ));
    }

    validate_weights(&config.weights)
}

/// Weights must be finite, non-negative, and not all zero
fn validate_weights(weights: &ScoreWeights) -> Result<(), ConfigError> {
    let all = [weights.accessibility, weights.seo, weights.performance];

    if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ConfigError::Validation(format!(
            "weights must be finite and non-negative, got {:?}",
            weights
        )));
    }

    if all.iter().sum::<f64>() <= 0.0 {
        return Err(ConfigError::Validation(
            "weights must not all be zero".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut config = Config::default();
        config.server.listen = "not-an-address".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut config = Config::default();
        config.workers.seo = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_oversized_pool_rejected() {
        let mut config = Config::default();
        config.workers.fetch = 65;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_request_timeout_shorter_than_fetch_rejected() {
        let mut config = Config::default();
        config.pipeline.request_timeout_ms = 1_000;
        config.fetcher.navigation_timeout_ms = 5_000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_default_lease_outlives_longest_fetch() {
        let config = Config::default();
        // 4 navigations of 20s plus 2 retry pauses of 500ms
        assert_eq!(config.fetcher.worst_case_fetch_ms(), 81_000);
        assert!(config.queue.lease_ms > config.fetcher.worst_case_fetch_ms());
    }

    #[test]
    fn test_lease_shorter_than_retrying_fetch_rejected() {
        let mut config = Config::default();
        config.queue.lease_ms = 30_000;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_lease_equal_to_longest_fetch_rejected() {
        let mut config = Config::default();
        config.queue.lease_ms = config.fetcher.worst_case_fetch_ms();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_max_wait_shorter_than_fetch_rejected() {
        let mut config = Config::default();
        config.server.max_wait_ms = 60_000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_more_retries_need_longer_lease() {
        let mut config = Config::default();
        config.fetcher.max_retries = 4;
        assert!(validate(&config).is_err());

        let fetch_ms = config.fetcher.worst_case_fetch_ms();
        config.queue.lease_ms = fetch_ms + 1;
        config.server.max_wait_ms = fetch_ms;
        config.pipeline.request_timeout_ms = fetch_ms;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = Config::default();
        config.pipeline.weights.seo = -1.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_all_zero_weights_rejected() {
        let mut config = Config::default();
        config.pipeline.weights = ScoreWeights {
            accessibility: 0.0,
            seo: 0.0,
            performance: 0.0,
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_single_nonzero_weight_accepted() {
        let mut config = Config::default();
        config.pipeline.weights = ScoreWeights {
            accessibility: 1.0,
            seo: 0.0,
            performance: 0.0,
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_user_agent_rejected() {
        let mut config = Config::default();
        config.fetcher.user_agent = "  ".to_string();
        assert!(validate(&config).is_err());
    }

    #[cfg(not(feature = "headless"))]
    #[test]
    fn test_headless_renderer_needs_feature() {
        let mut config = Config::default();
        config.fetcher.renderer = RendererKind::Headless;
        assert!(validate(&config).is_err());
    }
}
