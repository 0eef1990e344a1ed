//! Async handle over the shared queue
//!
//! Wraps a `Store` with a `Notify` so waiting workers and the master wake as
//! soon as a job is enqueued or finishes, with a poll interval as fallback for
//! jobs that become claimable through lease expiry.

use crate::queue::traits::{QueueResult, Store};
use crate::queue::{ClaimedJob, JobFailure, JobKind, NewJob};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Cloneable handle to the queue shared by every task
#[derive(Clone)]
pub struct WorkQueue {
    store: Arc<dyn Store>,
    events: Arc<Notify>,
    poll_interval: Duration,
}

impl WorkQueue {
    /// Creates a handle
    ///
    /// # Arguments
    ///
    /// * `store` - Backing store shared by all clones
    /// * `poll_interval` - Longest a waiter sleeps between claim attempts
    pub fn new(store: Arc<dyn Store>, poll_interval: Duration) -> Self {
        Self {
            store,
            events: Arc::new(Notify::new()),
            poll_interval,
        }
    }

    /// Returns the backing store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Enqueues a job and wakes waiting workers
    pub fn enqueue(&self, job: NewJob) -> QueueResult<String> {
        let id = self.store.enqueue(job)?;
        self.events.notify_waiters();
        Ok(id)
    }

    /// Completes a job and wakes waiters (dependents may now be claimable)
    pub fn complete(
        &self,
        job_id: &str,
        lease_token: &str,
        result: &serde_json::Value,
    ) -> QueueResult<bool> {
        let accepted = self.store.complete(job_id, lease_token, result)?;
        if accepted {
            self.events.notify_waiters();
        }
        Ok(accepted)
    }

    /// Fails a job and wakes waiters
    pub fn fail(&self, job_id: &str, lease_token: &str, failure: &JobFailure) -> QueueResult<bool> {
        let accepted = self.store.fail(job_id, lease_token, failure)?;
        if accepted {
            self.events.notify_waiters();
        }
        Ok(accepted)
    }

    /// Extends the lease on a running job
    pub fn renew_lease(&self, job_id: &str, lease_token: &str) -> QueueResult<Option<i64>> {
        self.store.renew_lease(job_id, lease_token)
    }

    /// Wakes every task blocked in `claim_wait` or on `notified`
    pub fn notify(&self) {
        self.events.notify_waiters();
    }

    /// Claims a job of `kind`, waiting up to `timeout` for one to appear
    ///
    /// # Returns
    ///
    /// * `Ok(Some(job))` - A claimed job with a fresh lease
    /// * `Ok(None)` - Nothing became claimable before the timeout
    /// * `Err(QueueError)` - The store failed
    pub async fn claim_wait(
        &self,
        kind: JobKind,
        worker_id: &str,
        timeout: Duration,
    ) -> QueueResult<Option<ClaimedJob>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register before checking so a notification between the check
            // and the wait is not lost
            let notified = self.events.notified();

            if let Some(claimed) = self.store.claim(kind, worker_id)? {
                return Ok(Some(claimed));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wait = self.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    /// Returns a future resolved by the next queue event
    ///
    /// The future observes events from the moment it is created, so create it
    /// before checking state and await it afterwards.
    pub fn notified(&self) -> Notified<'_> {
        self.events.notified()
    }
}
