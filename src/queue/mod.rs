//! Job queue module
//!
//! This module owns every durable record of the pipeline:
//! - Analysis requests and their lifecycle status
//! - Jobs with leases, attempts and dependency edges
//! - The fetch artifact shared by all analysis jobs of a request
//! - The final report, stored once per request
//!
//! Workers and the master only ever mutate jobs through the `JobQueue`
//! contract; the async `WorkQueue` handle adds blocking claims on top.

mod handle;
mod schema;
mod sqlite;
mod traits;

pub use handle::WorkQueue;
pub use sqlite::SqliteStore;
pub use traits::{JobQueue, QueueError, QueueResult, RequestStore, Store};

use crate::pipeline::ReportType;
use crate::state::{ErrorCode, JobState, RequestStatus};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named work kinds the queue dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Fetch,
    Accessibility,
    Seo,
    Performance,
}

impl JobKind {
    /// The analysis kinds, in report order
    pub const ANALYSIS: [JobKind; 3] = [Self::Accessibility, Self::Seo, Self::Performance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Accessibility => "accessibility",
            Self::Seo => "seo",
            Self::Performance => "performance",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "accessibility" => Some(Self::Accessibility),
            "seo" => Some(Self::Seo),
            "performance" => Some(Self::Performance),
            _ => None,
        }
    }

    pub fn is_analysis(&self) -> bool {
        !matches!(self, Self::Fetch)
    }

    pub fn all_kinds() -> Vec<Self> {
        vec![Self::Fetch, Self::Accessibility, Self::Seo, Self::Performance]
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job to be enqueued
#[derive(Debug, Clone)]
pub struct NewJob {
    pub request_id: String,
    pub kind: JobKind,
    /// Job ids that must be `done` before this job is claimable
    pub depends_on: Vec<String>,
    pub payload: serde_json::Value,
}

/// Represents a job in the queue
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub seq: i64,
    pub request_id: String,
    pub kind: JobKind,
    pub depends_on: Vec<String>,
    pub state: JobState,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Returns the recorded failure of a failed job
    pub fn failure(&self) -> Option<JobFailure> {
        match (self.state, self.error_code) {
            (JobState::Failed, Some(code)) => Some(JobFailure::new(
                code,
                self.error_message.clone().unwrap_or_default(),
            )),
            (JobState::Failed, None) => Some(JobFailure::new(
                ErrorCode::Internal,
                "job failed without an error code",
            )),
            _ => None,
        }
    }
}

/// Proof of ownership over a running job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub token: String,
    pub worker_id: String,
    /// Unix epoch milliseconds
    pub expires_at_ms: i64,
}

/// A job together with the lease its claimer holds
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: JobRecord,
    pub lease: Lease,
}

/// Error recorded on a failed job or request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Represents an analysis request in the database
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub id: String,
    pub raw_url: String,
    pub normalized_url: String,
    pub report_type: ReportType,
    pub status: RequestStatus,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestRecord {
    /// Creates a freshly received request with a new id
    pub fn received(raw_url: &str, normalized_url: &str, report_type: ReportType) -> Self {
        // Stored timestamps keep millisecond precision
        let now = Utc::now().trunc_subsecs(3);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            raw_url: raw_url.to_string(),
            normalized_url: normalized_url.to_string(),
            report_type,
            status: RequestStatus::Received,
            error_code: None,
            error_message: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    /// Returns the recorded failure of a failed request
    pub fn failure(&self) -> Option<JobFailure> {
        if self.status != RequestStatus::Failed {
            return None;
        }
        Some(JobFailure::new(
            self.error_code.unwrap_or(ErrorCode::Internal),
            self.error_message.clone().unwrap_or_default(),
        ))
    }
}
