//! Statistics from the queue database
//!
//! This module extracts job, request and report counts from the store and
//! prints them for the `--stats` command.

use crate::output::OutputResult;
use crate::queue::{JobKind, Store};
use crate::state::{JobState, RequestStatus};
use std::collections::BTreeMap;

/// Queue statistics summary
#[derive(Debug, Clone, Default)]
pub struct QueueStatistics {
    /// Count of jobs by kind, then by state
    pub jobs: BTreeMap<JobKind, BTreeMap<JobState, u64>>,

    /// Count of requests by status
    pub requests: BTreeMap<RequestStatus, u64>,

    /// Number of stored reports
    pub reports: u64,
}

impl QueueStatistics {
    pub fn total_jobs(&self) -> u64 {
        self.jobs.values().flat_map(|states| states.values()).sum()
    }

    pub fn total_requests(&self) -> u64 {
        self.requests.values().sum()
    }

    /// Share of terminal requests that completed, in percent
    pub fn completion_rate(&self) -> f64 {
        let completed = self.requests.get(&RequestStatus::Completed).copied().unwrap_or(0);
        let failed = self.requests.get(&RequestStatus::Failed).copied().unwrap_or(0);
        let terminal = completed + failed;
        if terminal == 0 {
            0.0
        } else {
            completed as f64 / terminal as f64 * 100.0
        }
    }
}

/// Loads statistics from the store
///
/// # Arguments
///
/// * `store` - The queue store to query
///
/// # Returns
///
/// * `Ok(QueueStatistics)` - Successfully loaded statistics
/// * `Err(OutputError)` - Failed to query the store
pub fn load_statistics(store: &dyn Store) -> OutputResult<QueueStatistics> {
    let mut stats = QueueStatistics::default();

    for (kind, state, count) in store.count_jobs()? {
        stats.jobs.entry(kind).or_default().insert(state, count);
    }

    for (status, count) in store.count_requests()? {
        stats.requests.insert(status, count);
    }

    stats.reports = store.count_reports()?;
    Ok(stats)
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &QueueStatistics) {
    println!("=== Queue Statistics ===\n");

    println!("Requests ({}):", stats.total_requests());
    for status in RequestStatus::all_states() {
        if let Some(count) = stats.requests.get(&status) {
            println!("  {}: {}", status, count);
        }
    }
    println!();

    println!("Jobs ({}):", stats.total_jobs());
    for (kind, states) in &stats.jobs {
        let counts: Vec<String> = states
            .iter()
            .map(|(state, count)| format!("{}={}", state, count))
            .collect();
        println!("  {}: {}", kind, counts.join(", "));
    }
    println!();

    println!("Reports stored: {}", stats.reports);
    println!("Completion Rate: {:.1}%", stats.completion_rate());
}
