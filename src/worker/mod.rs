//! Worker pools
//!
//! Every job kind is served by a pool of identical tasks. Each task loops:
//! claim a job of its kind, hand it to the kind's `JobHandler`, then complete
//! or fail the job under the lease it was given. The lease is renewed while
//! the handler runs. A handler error or panic is recorded on the job and never
//! ends the loop.

use crate::queue::{ClaimedJob, JobFailure, JobKind, JobRecord, WorkQueue};
use crate::state::ErrorCode;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long one `claim_wait` blocks before the loop rechecks shutdown
const CLAIM_WAIT: Duration = Duration::from_secs(1);

/// Pause after a queue error before claiming again
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Floor on the lease renewal period
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Executes jobs of a single kind
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// The job kind this handler serves
    fn kind(&self) -> JobKind;

    /// Runs one job
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - Result stored on the job
    /// * `Err(JobFailure)` - Failure recorded on the job
    async fn handle(&self, job: &JobRecord) -> Result<serde_json::Value, JobFailure>;
}

/// What happened to one claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// The lease was no longer ours; the result was discarded
    Rejected,
}

/// Runs a claimed job through `handler` and records the outcome
///
/// # Arguments
///
/// * `queue` - Queue the job was claimed from
/// * `handler` - Handler for the job's kind
/// * `claimed` - The job and the lease held on it
///
/// # Returns
///
/// What the queue accepted, or an error if the queue itself failed
pub async fn process_claimed(
    queue: &WorkQueue,
    handler: Arc<dyn JobHandler>,
    claimed: ClaimedJob,
) -> crate::queue::QueueResult<JobOutcome> {
    let ClaimedJob { job, lease } = claimed;
    let job_id = job.id.clone();
    let kind = job.kind;

    debug!(
        job_id = %job_id,
        request_id = %job.request_id,
        kind = %kind,
        attempt = job.attempts,
        "Processing job"
    );

    // Run on its own task so a panicking handler fails the job, not the loop
    let mut task = tokio::spawn(async move { handler.handle(&job).await });

    let every = heartbeat_interval(lease.expires_at_ms);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + every, every);
    let mut holding = true;
    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            _ = heartbeat.tick(), if holding => {
                match queue.renew_lease(&job_id, &lease.token) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!(job_id = %job_id, kind = %kind, "Lease lost while the job was running");
                        holding = false;
                    }
                    Err(e) => warn!(job_id = %job_id, kind = %kind, "Failed to renew lease: {}", e),
                }
            }
        }
    };

    let result = match joined {
        Ok(result) => result,
        Err(e) => Err(JobFailure::new(
            ErrorCode::Internal,
            format!("{} handler panicked: {}", kind, e),
        )),
    };

    let accepted = match &result {
        Ok(value) => queue.complete(&job_id, &lease.token, value)?,
        Err(failure) => queue.fail(&job_id, &lease.token, failure)?,
    };

    if !accepted {
        warn!(
            job_id = %job_id,
            kind = %kind,
            "Lease lost before the job finished, result discarded"
        );
        return Ok(JobOutcome::Rejected);
    }

    match result {
        Ok(_) => {
            debug!(job_id = %job_id, kind = %kind, "Job done");
            Ok(JobOutcome::Completed)
        }
        Err(failure) => {
            warn!(job_id = %job_id, kind = %kind, code = %failure.code, "Job failed: {}", failure.message);
            Ok(JobOutcome::Failed)
        }
    }
}

/// Renews three times per lease, so one missed renewal never loses the job
fn heartbeat_interval(expires_at_ms: i64) -> Duration {
    let remaining = expires_at_ms.saturating_sub(Utc::now().timestamp_millis());
    let every = u64::try_from(remaining / 3).unwrap_or(0);
    Duration::from_millis(every).max(MIN_HEARTBEAT)
}

/// Runs one worker loop until `shutdown` flips to true
///
/// # Arguments
///
/// * `queue` - Shared queue handle
/// * `handler` - Handler for the worker's job kind
/// * `worker_id` - Identifier recorded on leases
/// * `shutdown` - Becomes `true` when the process is stopping
pub async fn run_worker(
    queue: WorkQueue,
    handler: Arc<dyn JobHandler>,
    worker_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = handler.kind();
    debug!(worker_id = %worker_id, kind = %kind, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            claimed = queue.claim_wait(kind, &worker_id, CLAIM_WAIT) => claimed,
        };

        match claimed {
            Ok(Some(claimed)) => {
                if let Err(e) = process_claimed(&queue, handler.clone(), claimed).await {
                    error!(worker_id = %worker_id, kind = %kind, "Failed to record job outcome: {}", e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker_id = %worker_id, kind = %kind, "Claim failed: {}", e);
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }

    debug!(worker_id = %worker_id, kind = %kind, "Worker stopped");
}

/// Spawns `size` worker tasks sharing one handler
///
/// # Returns
///
/// The join handles of the spawned tasks
pub fn spawn_pool(
    queue: &WorkQueue,
    handler: Arc<dyn JobHandler>,
    size: usize,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let kind = handler.kind();
    info!("Starting {} {} worker(s)", size, kind);

    (0..size)
        .map(|i| {
            let worker_id = format!("{}-{}-{}", kind, i, &uuid::Uuid::new_v4().simple().to_string()[..8]);
            tokio::spawn(run_worker(
                queue.clone(),
                handler.clone(),
                worker_id,
                shutdown.clone(),
            ))
        })
        .collect()
}
