use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable that overrides `[queue] database-path`
pub const QUEUE_URL_ENV: &str = "PAGESCOPE_QUEUE_URL";

/// Environment variable that overrides `[server] listen`
pub const LISTEN_ENV: &str = "PAGESCOPE_LISTEN";

/// Loads and parses a configuration file from the given path
///
/// Environment overrides are applied after parsing and before validation.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use pagescope::config::load_config;
///
/// let config = load_config(Path::new("pagescope.toml")).unwrap();
/// println!("Listening on {}", config.server.listen);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    finalize(config, |key| std::env::var(key).ok())
}

/// Builds the configuration used when no file is given
///
/// Defaults plus environment overrides, validated.
pub fn default_config() -> Result<Config, ConfigError> {
    finalize(Config::default(), |key| std::env::var(key).ok())
}

/// Applies overrides from `lookup` and validates the result
fn finalize<F>(mut config: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup);
    validate(&config)?;
    Ok(config)
}

/// Overrides config values from the environment
///
/// # Arguments
///
/// * `config` - Parsed configuration to patch in place
/// * `lookup` - Variable lookup, `std::env::var` in production
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(queue_url) = lookup(QUEUE_URL_ENV).filter(|v| !v.trim().is_empty()) {
        config.queue.database_path = queue_url;
    }

    if let Some(listen) = lookup(LISTEN_ENV).filter(|v| !v.trim().is_empty()) {
        config.server.listen = listen;
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so operators can tell which config a process runs with.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok((Config, String))` - Successfully loaded configuration and its hash
/// * `Err(ConfigError)` - Failed to load or parse the configuration
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
