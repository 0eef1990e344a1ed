//! Master worker
//!
//! Drives every active request through its lifecycle:
//!
//! ```text
//! received -> fetching -> analyzing -> aggregating -> completed
//!                 |            |             |
//!                 +------------+-------------+------> failed
//! ```
//!
//! The master is the only writer of request status. It wakes on queue
//! events with a fixed tick as fallback, so a missed notification costs at
//! most one tick.

use crate::config::PipelineConfig;
use crate::fetcher::FetchPayload;
use crate::pipeline::aggregate::{aggregate, Aggregation};
use crate::queue::{
    JobFailure, JobKind, JobRecord, NewJob, QueueResult, RequestRecord, WorkQueue,
};
use crate::state::{ErrorCode, JobState, RequestStatus};
use chrono::Utc;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shortest gap between two purges of expired requests
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// The per-request state machine
pub struct Master {
    queue: WorkQueue,
    config: PipelineConfig,
    last_purge: Option<Instant>,
}

impl Master {
    pub fn new(queue: WorkQueue, config: PipelineConfig) -> Self {
        Self {
            queue,
            config,
            last_purge: None,
        }
    }

    /// Runs until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Master started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Created before the tick so events raised during it are not lost
            let queue = self.queue.clone();
            let notified = queue.notified();

            if let Err(e) = self.tick() {
                error!("Master tick failed: {}", e);
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::timeout(self.config.tick_interval(), notified) => {}
            }
        }

        info!("Master stopped");
    }

    /// Runs one pass over every active request
    ///
    /// Reaps expired leases first so requests see their final job states,
    /// then advances each request, then purges expired ones.
    pub fn tick(&mut self) -> QueueResult<()> {
        let store = self.queue.store().clone();

        let reaped = store.reap_expired()?;
        if !reaped.is_empty() {
            warn!("Failed {} job(s) whose lease expired too often", reaped.len());
            self.queue.notify();
        }

        for request in store.active_requests()? {
            if let Err(e) = self.advance(&request) {
                error!(request_id = %request.id, "Failed to advance request: {}", e);
            }
        }

        self.purge_if_due()?;
        Ok(())
    }

    /// Moves one request forward as far as its jobs allow
    pub fn advance(&self, request: &RequestRecord) -> QueueResult<()> {
        if self.timed_out(request) {
            return self.time_out(request);
        }

        let mut request = request.clone();
        loop {
            let next = match request.status {
                RequestStatus::Received => self.start_fetch(&request)?,
                RequestStatus::Fetching => self.after_fetch(&request)?,
                RequestStatus::Analyzing => self.after_analysis(&request)?,
                RequestStatus::Aggregating => self.finish(&request)?,
                RequestStatus::Completed | RequestStatus::Failed => None,
            };

            match next {
                Some(status) if status != request.status => request.status = status,
                _ => return Ok(()),
            }
        }
    }

    fn timed_out(&self, request: &RequestRecord) -> bool {
        let elapsed = Utc::now().signed_duration_since(request.submitted_at);
        elapsed
            .to_std()
            .map(|elapsed| elapsed > self.config.request_timeout())
            .unwrap_or(false)
    }

    fn time_out(&self, request: &RequestRecord) -> QueueResult<()> {
        let failure = JobFailure::new(
            ErrorCode::RequestTimeout,
            format!(
                "request did not finish within {}ms",
                self.config.request_timeout_ms
            ),
        );
        let abandoned = self.queue.store().abandon_request(&request.id, &failure)?;
        warn!(
            request_id = %request.id,
            status = %request.status,
            abandoned,
            "Request timed out"
        );
        self.transition(request, RequestStatus::Failed, Some(&failure))?;
        Ok(())
    }

    /// `received`: enqueue the fetch job
    fn start_fetch(&self, request: &RequestRecord) -> QueueResult<Option<RequestStatus>> {
        let jobs = self.queue.store().jobs_for_request(&request.id)?;

        if !jobs.iter().any(|j| j.kind == JobKind::Fetch) {
            let payload = serde_json::to_value(FetchPayload {
                url: request.normalized_url.clone(),
            })?;
            let job_id = self.queue.enqueue(NewJob {
                request_id: request.id.clone(),
                kind: JobKind::Fetch,
                depends_on: Vec::new(),
                payload,
            })?;
            debug!(request_id = %request.id, job_id = %job_id, "Fetch job enqueued");
        }

        self.step(request, RequestStatus::Fetching, None)
    }

    /// `fetching`: fan out on success, fail the request on failure
    fn after_fetch(&self, request: &RequestRecord) -> QueueResult<Option<RequestStatus>> {
        let jobs = self.queue.store().jobs_for_request(&request.id)?;
        let fetch = match fetch_job(&jobs) {
            Some(fetch) => fetch,
            None => {
                let failure = JobFailure::new(ErrorCode::Internal, "fetch job is missing");
                return self.step(request, RequestStatus::Failed, Some(&failure));
            }
        };

        match fetch.state {
            JobState::Queued | JobState::Running => Ok(None),
            JobState::Failed => {
                let failure = fetch.failure().unwrap_or_else(|| {
                    JobFailure::new(ErrorCode::Internal, "fetch failed without a reason")
                });
                self.step(request, RequestStatus::Failed, Some(&failure))
            }
            JobState::Done => {
                for kind in request.report_type.kinds() {
                    if jobs.iter().any(|j| j.kind == kind) {
                        continue;
                    }
                    let job_id = self.queue.enqueue(NewJob {
                        request_id: request.id.clone(),
                        kind,
                        depends_on: vec![fetch.id.clone()],
                        payload: json!({}),
                    })?;
                    debug!(request_id = %request.id, job_id = %job_id, kind = %kind, "Analysis job enqueued");
                }
                self.step(request, RequestStatus::Analyzing, None)
            }
        }
    }

    /// `analyzing`: wait for every analysis job to be terminal
    fn after_analysis(&self, request: &RequestRecord) -> QueueResult<Option<RequestStatus>> {
        let jobs = self.queue.store().jobs_for_request(&request.id)?;
        let all_terminal = jobs
            .iter()
            .filter(|j| j.kind.is_analysis())
            .all(|j| j.state.is_terminal());

        if all_terminal {
            self.step(request, RequestStatus::Aggregating, None)
        } else {
            Ok(None)
        }
    }

    /// `aggregating`: build and store the report, or fail the request
    fn finish(&self, request: &RequestRecord) -> QueueResult<Option<RequestStatus>> {
        let store = self.queue.store();
        let jobs = store.jobs_for_request(&request.id)?;

        match aggregate(request, &jobs, &self.config.weights) {
            Aggregation::Pending => {
                // Only reachable if a job was re-queued after the fan-in
                warn!(request_id = %request.id, "Aggregating with unfinished jobs");
                Ok(None)
            }
            Aggregation::Report(report) => {
                if !store.put_report(&report)? {
                    debug!(request_id = %request.id, "Report already stored, keeping the first");
                }
                info!(
                    request_id = %request.id,
                    url = %request.normalized_url,
                    overall = report.scores.overall,
                    findings = report.summary.total_violations,
                    "Request completed"
                );
                self.step(request, RequestStatus::Completed, None)
            }
            Aggregation::Failed(failure) => self.step(request, RequestStatus::Failed, Some(&failure)),
        }
    }

    /// Applies a transition and returns the new status if it took effect
    fn step(
        &self,
        request: &RequestRecord,
        to: RequestStatus,
        failure: Option<&JobFailure>,
    ) -> QueueResult<Option<RequestStatus>> {
        Ok(self.transition(request, to, failure)?.then_some(to))
    }

    /// Moves `request` to `to` if the transition is valid and nobody else
    /// moved it first
    fn transition(
        &self,
        request: &RequestRecord,
        to: RequestStatus,
        failure: Option<&JobFailure>,
    ) -> QueueResult<bool> {
        let from = request.status;
        if !from.can_transition_to(to) {
            warn!(
                request_id = %request.id,
                "Ignoring invalid transition {} -> {}",
                from,
                to
            );
            return Ok(false);
        }

        let applied = self
            .queue
            .store()
            .update_request_status(&request.id, from, to, failure)?;

        if applied {
            match failure {
                Some(f) => info!(request_id = %request.id, "Request {} -> {} ({})", from, to, f),
                None => debug!(request_id = %request.id, "Request {} -> {}", from, to),
            }
            // Wake API callers waiting on this request
            self.queue.notify();
        } else {
            warn!(request_id = %request.id, "Request moved away from {} concurrently", from);
        }

        Ok(applied)
    }

    fn purge_if_due(&mut self) -> QueueResult<()> {
        if let Some(last) = self.last_purge {
            if last.elapsed() < PURGE_INTERVAL {
                return Ok(());
            }
        }
        self.last_purge = Some(Instant::now());

        let ttl = chrono::Duration::from_std(self.config.report_ttl())
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let purged = self
            .queue
            .store()
            .purge_terminal_before(Utc::now() - ttl)?;
        if purged > 0 {
            info!("Purged {} expired request(s)", purged);
        }
        Ok(())
    }
}

fn fetch_job(jobs: &[JobRecord]) -> Option<&JobRecord> {
    jobs.iter().find(|j| j.kind == JobKind::Fetch)
}
