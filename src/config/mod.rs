//! Configuration module for Pagescope
//!
//! This module handles loading, parsing, validating and environment-overriding
//! TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use pagescope::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("pagescope.toml")).unwrap();
//! println!("Fetch workers: {}", config.workers.fetch);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, FetcherConfig, PipelineConfig, QueueConfig, RendererKind, ScoreWeights, ServerConfig,
    WorkerConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, default_config, load_config, load_config_with_hash,
    LISTEN_ENV, QUEUE_URL_ENV,
};
pub use validation::validate;
