//! Pipeline module
//!
//! This module wires the queue, the worker pools and the master together:
//! - `Pipeline` owns the running tasks and their shutdown signal
//! - `PipelineHandle` is the cheap, cloneable entry point used by the API
//!   and the CLI to submit requests and wait for their outcome
//! - `Master` advances each request through its lifecycle
//! - `aggregate` turns a terminal job set into a `Report`

mod aggregate;
mod coordinator;
mod report;

pub use aggregate::{aggregate, overall_score, Aggregation};
pub use coordinator::Master;
pub use report::{Report, ReportType, Scores, Summary};

use crate::analysis::AnalysisHandler;
use crate::config::Config;
use crate::fetcher::{build_http_client, build_renderer, FetchHandler, Renderer};
use crate::queue::{JobFailure, JobKind, RequestRecord, SqliteStore, Store, WorkQueue};
use crate::state::{ErrorCode, RequestStatus};
use crate::url::normalize_site_url;
use crate::worker::{spawn_pool, JobHandler};
use crate::{PagescopeError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// How long `Pipeline::shutdown` lets busy tasks finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Where a request stands from a caller's point of view
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The request finished with a report
    Completed(Box<Report>),
    /// The request finished without one
    Failed {
        request_id: String,
        failure: JobFailure,
    },
    /// The request is still moving
    Pending {
        request_id: String,
        status: RequestStatus,
    },
}

impl Outcome {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Completed(report) => &report.request_id,
            Self::Failed { request_id, .. } | Self::Pending { request_id, .. } => request_id,
        }
    }

    /// Returns true once the request can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

/// Cloneable entry point into a running pipeline
#[derive(Clone)]
pub struct PipelineHandle {
    queue: WorkQueue,
    max_wait: Duration,
    poll_interval: Duration,
}

impl PipelineHandle {
    pub fn new(queue: WorkQueue, max_wait: Duration, poll_interval: Duration) -> Self {
        Self {
            queue,
            max_wait,
            poll_interval,
        }
    }

    /// Default time `analyze` waits for a terminal state
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Validates and records a new request
    ///
    /// # Arguments
    ///
    /// * `raw_url` - Site as typed by the caller
    /// * `report_type` - Optional report type, `full` when absent
    ///
    /// # Returns
    ///
    /// * `Ok(RequestRecord)` - The request, in state `received`
    /// * `Err(PagescopeError)` - Invalid URL or report type, or the queue is down
    pub fn submit(&self, raw_url: &str, report_type: Option<&str>) -> Result<RequestRecord> {
        let normalized = normalize_site_url(raw_url)?;
        let report_type = ReportType::parse(report_type)?;

        let request = RequestRecord::received(raw_url, normalized.as_str(), report_type);
        self.queue.store().insert_request(&request)?;

        info!(
            request_id = %request.id,
            url = %request.normalized_url,
            report_type = %report_type,
            "Request received"
        );

        // The master picks it up on its next pass
        self.queue.notify();
        Ok(request)
    }

    /// Returns the current outcome of a request without waiting
    pub fn status(&self, request_id: &str) -> Result<Outcome> {
        let store = self.queue.store();
        let request = store
            .get_request(request_id)?
            .ok_or_else(|| PagescopeError::RequestNotFound(request_id.to_string()))?;

        let outcome = match request.status {
            RequestStatus::Completed => match store.get_report(request_id)? {
                Some(report) => Outcome::Completed(Box::new(report)),
                None => Outcome::Failed {
                    request_id: request.id,
                    failure: JobFailure::new(ErrorCode::Internal, "completed without a report"),
                },
            },
            RequestStatus::Failed => Outcome::Failed {
                failure: request.failure().unwrap_or_else(|| {
                    JobFailure::new(ErrorCode::Internal, "failed without a reason")
                }),
                request_id: request.id,
            },
            status => Outcome::Pending {
                request_id: request.id,
                status,
            },
        };
        Ok(outcome)
    }

    /// Waits until a request is terminal or `max_wait` elapses
    ///
    /// Wakes on queue events, re-checking at least every poll interval.
    pub async fn wait(&self, request_id: &str, max_wait: Duration) -> Result<Outcome> {
        let deadline = Instant::now() + max_wait;

        loop {
            let notified = self.queue.notified();

            let outcome = self.status(request_id)?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(outcome);
            }

            let wait = self.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    /// Submits a request and waits for its outcome
    pub async fn analyze(&self, raw_url: &str, report_type: Option<&str>) -> Result<Outcome> {
        let request = self.submit(raw_url, report_type)?;
        self.wait(&request.id, self.max_wait).await
    }

    /// Checks that the queue answers
    pub fn ping(&self) -> Result<()> {
        self.queue.store().ping()?;
        Ok(())
    }
}

/// A running pipeline: worker pools plus the master
pub struct Pipeline {
    handle: PipelineHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Opens the configured queue and starts every task
    pub async fn start(config: &Config) -> Result<Self> {
        let store = SqliteStore::open(
            &config.queue.database_path,
            config.queue.lease(),
            config.queue.max_attempts,
        )?;
        Self::start_with_store(config, Arc::new(store)).await
    }

    /// Starts every task against an existing store
    pub async fn start_with_store(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let renderer = build_renderer(&config.fetcher).await?;
        Self::start_with(config, store, renderer)
    }

    /// Starts every task with an explicit store and renderer
    ///
    /// # Arguments
    ///
    /// * `config` - Full configuration
    /// * `store` - Queue storage shared by every task
    /// * `renderer` - Renderer used by the fetch workers
    pub fn start_with(
        config: &Config,
        store: Arc<dyn Store>,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self> {
        let queue = WorkQueue::new(store.clone(), config.queue.poll_interval());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let client = build_http_client(&config.fetcher)?;

        let mut tasks = Vec::new();

        let fetch: Arc<dyn JobHandler> = Arc::new(FetchHandler::new(
            renderer.clone(),
            client,
            store.clone(),
            &config.fetcher,
        ));
        tasks.extend(spawn_pool(&queue, fetch, config.workers.fetch, &shutdown_rx));

        for kind in JobKind::ANALYSIS {
            let size = match kind {
                JobKind::Accessibility => config.workers.accessibility,
                JobKind::Seo => config.workers.seo,
                JobKind::Performance => config.workers.performance,
                JobKind::Fetch => continue,
            };
            let handler: Arc<dyn JobHandler> = Arc::new(AnalysisHandler::new(kind, store.clone())?);
            tasks.extend(spawn_pool(&queue, handler, size, &shutdown_rx));
        }

        let master = Master::new(queue.clone(), config.pipeline.clone());
        tasks.push(tokio::spawn(master.run(shutdown_rx)));

        info!(
            "Pipeline started with {} renderer and {} task(s)",
            renderer.name(),
            tasks.len()
        );

        Ok(Self {
            handle: PipelineHandle::new(
                queue,
                config.server.max_wait(),
                config.queue.poll_interval(),
            ),
            shutdown,
            tasks,
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Signals every task to stop and waits for them
    ///
    /// Tasks still busy with a job after `SHUTDOWN_GRACE` are aborted; their
    /// jobs become claimable again once the lease expires.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            warn!("Every pipeline task already stopped");
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        let mut aborted = 0;
        for mut task in self.tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Pipeline task ended abnormally: {}", e),
                Err(_) => {
                    task.abort();
                    aborted += 1;
                }
            }
        }

        if aborted > 0 {
            warn!("Aborted {} task(s) still busy at shutdown", aborted);
        }
        info!("Pipeline stopped");
    }
}
