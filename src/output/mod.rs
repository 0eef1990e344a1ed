//! Output module for reports and queue statistics
//!
//! This module handles:
//! - Rendering a report as markdown
//! - Collecting and printing queue statistics

mod markdown;
pub mod stats;

pub use markdown::{format_markdown_report, write_markdown_report};
pub use stats::{load_statistics, print_statistics, QueueStatistics};

use thiserror::Error;

/// Errors that can occur while producing output
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
