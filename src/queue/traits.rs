//! Queue traits and error types
//!
//! This module defines the narrow contract workers and the master use to
//! move jobs, plus the request/artifact/report store behind it.

use crate::fetcher::FetchArtifact;
use crate::pipeline::Report;
use crate::queue::{ClaimedJob, JobFailure, JobKind, JobRecord, NewJob, RequestRecord};
use crate::state::{ErrorCode, JobState, RequestStatus};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl QueueError {
    /// Maps this error onto the wire-level error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) | Self::Sqlite(_) => ErrorCode::QueueUnavailable,
            _ => ErrorCode::Internal,
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Work queue contract
///
/// Implementations must be safe to share between every worker task and the
/// master. Claims are exclusive: a job is held by at most one lease at a time,
/// and only the current lease holder may complete or fail it.
pub trait JobQueue: Send + Sync {
    /// Adds a job in state `queued`
    ///
    /// # Returns
    ///
    /// The id of the new job
    fn enqueue(&self, job: NewJob) -> QueueResult<String>;

    /// Claims the oldest claimable job of `kind`, if any
    ///
    /// A job is claimable when it is `queued`, or `running` with an expired
    /// lease and attempts left, and every dependency is `done`. Never blocks.
    fn claim(&self, kind: JobKind, worker_id: &str) -> QueueResult<Option<ClaimedJob>>;

    /// Pushes the lease expiry of a running job out by one lease length
    ///
    /// Workers call this periodically while a job runs, so a job that takes
    /// longer than one lease is not reclaimed from under a live worker.
    ///
    /// # Returns
    ///
    /// The new expiry in unix milliseconds, or `None` if `lease_token` is no
    /// longer the job's current lease
    fn renew_lease(&self, job_id: &str, lease_token: &str) -> QueueResult<Option<i64>>;

    /// Marks a running job `done`
    ///
    /// # Returns
    ///
    /// `false` if `lease_token` is not the job's current lease (the result is
    /// discarded)
    fn complete(
        &self,
        job_id: &str,
        lease_token: &str,
        result: &serde_json::Value,
    ) -> QueueResult<bool>;

    /// Marks a running job `failed`
    ///
    /// # Returns
    ///
    /// `false` if `lease_token` is not the job's current lease
    fn fail(&self, job_id: &str, lease_token: &str, failure: &JobFailure) -> QueueResult<bool>;

    /// Gets a job by ID
    fn get_job(&self, job_id: &str) -> QueueResult<Option<JobRecord>>;

    /// Gets every job of a request in enqueue order
    fn jobs_for_request(&self, request_id: &str) -> QueueResult<Vec<JobRecord>>;

    /// Fails every non-terminal job of a request
    ///
    /// Later completions by the workers still holding those jobs are rejected.
    ///
    /// # Returns
    ///
    /// The number of jobs abandoned
    fn abandon_request(&self, request_id: &str, failure: &JobFailure) -> QueueResult<usize>;

    /// Fails running jobs whose lease expired with no attempts left
    ///
    /// # Returns
    ///
    /// The ids of the jobs failed with `LeaseExpired`
    fn reap_expired(&self) -> QueueResult<Vec<String>>;

    /// Checks that the backing store answers
    fn ping(&self) -> QueueResult<()>;
}

/// Store for requests and the data they produce
pub trait RequestStore: Send + Sync {
    // ===== Requests =====

    /// Inserts a new request
    fn insert_request(&self, request: &RequestRecord) -> QueueResult<()>;

    /// Gets a request by ID
    fn get_request(&self, request_id: &str) -> QueueResult<Option<RequestRecord>>;

    /// Gets every request that has not reached a terminal status, oldest first
    fn active_requests(&self) -> QueueResult<Vec<RequestRecord>>;

    /// Moves a request from `from` to `to`
    ///
    /// The update is conditional on the stored status still being `from`, so
    /// two writers racing on one request cannot both win.
    ///
    /// # Returns
    ///
    /// `false` if the stored status was no longer `from`
    fn update_request_status(
        &self,
        request_id: &str,
        from: RequestStatus,
        to: RequestStatus,
        failure: Option<&JobFailure>,
    ) -> QueueResult<bool>;

    /// Deletes terminal requests last updated before `cutoff`, with everything
    /// they own
    ///
    /// # Returns
    ///
    /// The number of requests purged
    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> QueueResult<usize>;

    // ===== Artifacts =====

    /// Publishes the fetch artifact of a request
    ///
    /// # Returns
    ///
    /// `false` if an artifact was already published (first write wins)
    fn put_artifact(&self, artifact: &FetchArtifact) -> QueueResult<bool>;

    /// Gets the fetch artifact of a request
    fn get_artifact(&self, request_id: &str) -> QueueResult<Option<FetchArtifact>>;

    // ===== Reports =====

    /// Stores the report of a request
    ///
    /// # Returns
    ///
    /// `false` if a report was already stored (first write wins)
    fn put_report(&self, report: &Report) -> QueueResult<bool>;

    /// Gets the stored report of a request
    fn get_report(&self, request_id: &str) -> QueueResult<Option<Report>>;

    // ===== Statistics =====

    /// Counts jobs grouped by kind and state
    fn count_jobs(&self) -> QueueResult<Vec<(JobKind, JobState, u64)>>;

    /// Counts requests grouped by status
    fn count_requests(&self) -> QueueResult<Vec<(RequestStatus, u64)>>;

    /// Counts stored reports
    fn count_reports(&self) -> QueueResult<u64>;
}

/// Everything the pipeline needs from its backing store
pub trait Store: JobQueue + RequestStore {}

impl<T: JobQueue + RequestStore> Store for T {}
