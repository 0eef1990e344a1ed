//! SQLite queue implementation
//!
//! This module provides a SQLite-based implementation of the `JobQueue` and
//! `RequestStore` traits. One connection is shared behind a mutex, so every
//! claim, completion and failure is serialized; each state change is also a
//! conditional `UPDATE` on the expected state and lease token.

use crate::fetcher::FetchArtifact;
use crate::pipeline::{Report, ReportType};
use crate::queue::schema::initialize_schema;
use crate::queue::traits::{JobQueue, QueueError, QueueResult, RequestStore};
use crate::queue::{ClaimedJob, JobFailure, JobKind, JobRecord, Lease, NewJob, RequestRecord};
use crate::state::{ErrorCode, JobState, RequestStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Database path that selects a private in-memory database
pub const MEMORY_PATH: &str = ":memory:";

const JOB_COLUMNS: &str = "seq, id, request_id, kind, state, payload, result, error_code, \
     error_message, attempts, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, raw_url, normalized_url, report_type, status, error_code, \
     error_message, submitted_at, updated_at";

/// Oldest claimable job of a kind: queued, or running with an expired lease
/// and attempts left, with every dependency done
const CLAIM_CANDIDATE_SQL: &str = "
    SELECT j.id FROM jobs j
    WHERE j.kind = ?1
      AND (j.state = 'queued'
           OR (j.state = 'running' AND j.lease_expires_at < ?2 AND j.attempts < ?3))
      AND NOT EXISTS (
          SELECT 1 FROM job_dependencies d
          JOIN jobs dep ON dep.id = d.depends_on
          WHERE d.job_id = j.id AND dep.state != 'done'
      )
    ORDER BY j.seq
    LIMIT 1
";

/// SQLite queue backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
    lease_ms: i64,
    max_attempts: u32,
}

impl SqliteStore {
    /// Opens (or creates) a queue database
    ///
    /// # Arguments
    ///
    /// * `database_path` - Path to the SQLite file, or `:memory:`
    /// * `lease` - How long a claim stays valid
    /// * `max_attempts` - Claims allowed before an expired job is reaped
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(QueueError)` - Failed to open database
    pub fn open(database_path: &str, lease: Duration, max_attempts: u32) -> QueueResult<Self> {
        if database_path == MEMORY_PATH {
            return Self::open_in_memory(lease, max_attempts);
        }

        let conn = Connection::open(database_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(Self::with_connection(conn, lease, max_attempts))
    }

    /// Creates a private in-memory database
    pub fn open_in_memory(lease: Duration, max_attempts: u32) -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self::with_connection(conn, lease, max_attempts))
    }

    fn with_connection(conn: Connection, lease: Duration, max_attempts: u32) -> Self {
        Self {
            conn: Mutex::new(conn),
            lease_ms: i64::try_from(lease.as_millis()).unwrap_or(i64::MAX),
            max_attempts,
        }
    }

    fn conn(&self) -> QueueResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Unavailable("queue connection mutex poisoned".to_string()))
    }
}

impl JobQueue for SqliteStore {
    fn enqueue(&self, job: NewJob) -> QueueResult<String> {
        let mut conn = self.conn()?;
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let payload = serde_json::to_string(&job.payload)?;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, request_id, kind, state, payload, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            params![
                id,
                job.request_id,
                job.kind.as_str(),
                JobState::Queued.to_db_string(),
                payload,
                now
            ],
        )?;
        for dependency in &job.depends_on {
            tx.execute(
                "INSERT OR IGNORE INTO job_dependencies (job_id, depends_on) VALUES (?1, ?2)",
                params![id, dependency],
            )?;
        }
        tx.commit()?;

        debug!(job_id = %id, kind = %job.kind, request_id = %job.request_id, "Enqueued job");
        Ok(id)
    }

    fn claim(&self, kind: JobKind, worker_id: &str) -> QueueResult<Option<ClaimedJob>> {
        let mut conn = self.conn()?;
        let now_ms = Utc::now().timestamp_millis();

        let tx = conn.transaction()?;
        let candidate: Option<String> = tx
            .query_row(
                CLAIM_CANDIDATE_SQL,
                params![kind.as_str(), now_ms, self.max_attempts],
                |row| row.get(0),
            )
            .optional()?;

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let token = Uuid::new_v4().to_string();
        let expires_at_ms = now_ms.saturating_add(self.lease_ms);
        let updated = tx.execute(
            "UPDATE jobs
             SET state = 'running', attempts = attempts + 1, lease_token = ?1,
                 lease_owner = ?2, lease_expires_at = ?3, updated_at = ?4
             WHERE id = ?5
               AND (state = 'queued' OR (state = 'running' AND lease_expires_at < ?6))",
            params![token, worker_id, expires_at_ms, now_rfc3339(), job_id, now_ms],
        )?;
        tx.commit()?;

        if updated == 0 {
            return Ok(None);
        }

        let job = load_job(&conn, &job_id)?.ok_or(QueueError::JobNotFound(job_id))?;
        Ok(Some(ClaimedJob {
            job,
            lease: Lease {
                token,
                worker_id: worker_id.to_string(),
                expires_at_ms,
            },
        }))
    }

    fn renew_lease(&self, job_id: &str, lease_token: &str) -> QueueResult<Option<i64>> {
        let conn = self.conn()?;
        let expires_at_ms = Utc::now().timestamp_millis().saturating_add(self.lease_ms);
        let changed = conn.execute(
            "UPDATE jobs SET lease_expires_at = ?1
             WHERE id = ?2 AND state = 'running' AND lease_token = ?3",
            params![expires_at_ms, job_id, lease_token],
        )?;
        Ok((changed == 1).then_some(expires_at_ms))
    }

    fn complete(
        &self,
        job_id: &str,
        lease_token: &str,
        result: &serde_json::Value,
    ) -> QueueResult<bool> {
        let conn = self.conn()?;
        let result = serde_json::to_string(result)?;
        let changed = conn.execute(
            "UPDATE jobs
             SET state = 'done', result = ?1, lease_token = NULL, lease_owner = NULL,
                 lease_expires_at = NULL, updated_at = ?2
             WHERE id = ?3 AND state = 'running' AND lease_token = ?4",
            params![result, now_rfc3339(), job_id, lease_token],
        )?;
        Ok(changed == 1)
    }

    fn fail(&self, job_id: &str, lease_token: &str, failure: &JobFailure) -> QueueResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs
             SET state = 'failed', error_code = ?1, error_message = ?2, lease_token = NULL,
                 lease_owner = NULL, lease_expires_at = NULL, updated_at = ?3
             WHERE id = ?4 AND state = 'running' AND lease_token = ?5",
            params![
                failure.code.as_str(),
                failure.message,
                now_rfc3339(),
                job_id,
                lease_token
            ],
        )?;
        Ok(changed == 1)
    }

    fn get_job(&self, job_id: &str) -> QueueResult<Option<JobRecord>> {
        let conn = self.conn()?;
        Ok(load_job(&conn, job_id)?)
    }

    fn jobs_for_request(&self, request_id: &str) -> QueueResult<Vec<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE request_id = ?1 ORDER BY seq",
            JOB_COLUMNS
        ))?;
        let mut jobs = stmt
            .query_map(params![request_id], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;

        for job in &mut jobs {
            job.depends_on = load_dependencies(&conn, &job.id)?;
        }

        Ok(jobs)
    }

    fn abandon_request(&self, request_id: &str, failure: &JobFailure) -> QueueResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs
             SET state = 'failed', error_code = ?1, error_message = ?2, lease_token = NULL,
                 lease_owner = NULL, lease_expires_at = NULL, updated_at = ?3
             WHERE request_id = ?4 AND state IN ('queued', 'running')",
            params![
                failure.code.as_str(),
                failure.message,
                now_rfc3339(),
                request_id
            ],
        )?;
        Ok(changed)
    }

    fn reap_expired(&self) -> QueueResult<Vec<String>> {
        let conn = self.conn()?;
        let now_ms = Utc::now().timestamp_millis();

        let mut stmt = conn.prepare(
            "SELECT id FROM jobs
             WHERE state = 'running' AND lease_expires_at < ?1 AND attempts >= ?2
             ORDER BY seq",
        )?;
        let expired = stmt
            .query_map(params![now_ms, self.max_attempts], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let message = format!("lease expired after {} attempts", self.max_attempts);
        let mut reaped = Vec::with_capacity(expired.len());
        for job_id in expired {
            let changed = conn.execute(
                "UPDATE jobs
                 SET state = 'failed', error_code = ?1, error_message = ?2, lease_token = NULL,
                     lease_owner = NULL, lease_expires_at = NULL, updated_at = ?3
                 WHERE id = ?4 AND state = 'running' AND lease_expires_at < ?5",
                params![
                    ErrorCode::LeaseExpired.as_str(),
                    message,
                    now_rfc3339(),
                    job_id,
                    now_ms
                ],
            )?;
            if changed == 1 {
                reaped.push(job_id);
            }
        }

        Ok(reaped)
    }

    fn ping(&self) -> QueueResult<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

impl RequestStore for SqliteStore {
    // ===== Requests =====

    fn insert_request(&self, request: &RequestRecord) -> QueueResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO requests (id, raw_url, normalized_url, report_type, status, error_code,
                                   error_message, submitted_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                request.id,
                request.raw_url,
                request.normalized_url,
                request.report_type.as_str(),
                request.status.to_db_string(),
                request.error_code.map(|c| c.as_str()),
                request.error_message,
                format_timestamp(&request.submitted_at),
                format_timestamp(&request.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_request(&self, request_id: &str) -> QueueResult<Option<RequestRecord>> {
        let conn = self.conn()?;
        let request = conn
            .query_row(
                &format!("SELECT {} FROM requests WHERE id = ?1", REQUEST_COLUMNS),
                params![request_id],
                row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    fn active_requests(&self) -> QueueResult<Vec<RequestRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM requests
             WHERE status NOT IN ('completed', 'failed')
             ORDER BY submitted_at, id",
            REQUEST_COLUMNS
        ))?;
        let requests = stmt
            .query_map([], row_to_request)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    fn update_request_status(
        &self,
        request_id: &str,
        from: RequestStatus,
        to: RequestStatus,
        failure: Option<&JobFailure>,
    ) -> QueueResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE requests
             SET status = ?1, error_code = ?2, error_message = ?3, updated_at = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                to.to_db_string(),
                failure.map(|f| f.code.as_str()),
                failure.map(|f| f.message.as_str()),
                now_rfc3339(),
                request_id,
                from.to_db_string()
            ],
        )?;
        Ok(changed == 1)
    }

    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> QueueResult<usize> {
        let conn = self.conn()?;
        let purged = conn.execute(
            "DELETE FROM requests WHERE status IN ('completed', 'failed') AND updated_at < ?1",
            params![format_timestamp(&cutoff)],
        )?;
        Ok(purged)
    }

    // ===== Artifacts =====

    fn put_artifact(&self, artifact: &FetchArtifact) -> QueueResult<bool> {
        let conn = self.conn()?;
        let body = serde_json::to_string(artifact)?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO artifacts (request_id, body, screenshot, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![artifact.request_id, body, artifact.screenshot, now_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    fn get_artifact(&self, request_id: &str) -> QueueResult<Option<FetchArtifact>> {
        let conn = self.conn()?;
        let row: Option<(String, Option<Vec<u8>>)> = conn
            .query_row(
                "SELECT body, screenshot FROM artifacts WHERE request_id = ?1",
                params![request_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((body, screenshot)) => {
                let mut artifact: FetchArtifact = serde_json::from_str(&body)?;
                artifact.screenshot = screenshot;
                Ok(Some(artifact))
            }
            None => Ok(None),
        }
    }

    // ===== Reports =====

    fn put_report(&self, report: &Report) -> QueueResult<bool> {
        let conn = self.conn()?;
        let body = serde_json::to_string(report)?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO reports (request_id, body, created_at) VALUES (?1, ?2, ?3)",
            params![report.request_id, body, now_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    fn get_report(&self, request_id: &str) -> QueueResult<Option<Report>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM reports WHERE request_id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    // ===== Statistics =====

    fn count_jobs(&self) -> QueueResult<Vec<(JobKind, JobState, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, state, COUNT(*) FROM jobs GROUP BY kind, state ORDER BY kind, state",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (kind, state, count) = row?;
            if let (Some(kind), Some(state)) =
                (JobKind::from_db_string(&kind), JobState::from_db_string(&state))
            {
                counts.push((kind, state, count as u64));
            }
        }
        Ok(counts)
    }

    fn count_requests(&self) -> QueueResult<Vec<(RequestStatus, u64)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM requests GROUP BY status ORDER BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = RequestStatus::from_db_string(&status) {
                counts.push((status, count as u64));
            }
        }
        Ok(counts)
    }

    fn count_reports(&self) -> QueueResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ===== Row mapping =====

fn load_job(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<JobRecord>> {
    let job = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![job_id],
            row_to_job,
        )
        .optional()?;

    match job {
        Some(mut job) => {
            job.depends_on = load_dependencies(conn, &job.id)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

fn load_dependencies(conn: &Connection, job_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT depends_on FROM job_dependencies WHERE job_id = ?1 ORDER BY rowid")?;
    let deps = stmt
        .query_map(params![job_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(deps)
}

/// Maps a `JOB_COLUMNS` row; dependencies are loaded separately
fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let error_code: Option<String> = row.get(7)?;
    Ok(JobRecord {
        seq: row.get(0)?,
        id: row.get(1)?,
        request_id: row.get(2)?,
        kind: decode(3, row.get(3)?, JobKind::from_db_string)?,
        depends_on: Vec::new(),
        state: decode(4, row.get(4)?, JobState::from_db_string)?,
        payload: decode_json(5, row.get(5)?)?,
        result: row
            .get::<_, Option<String>>(6)?
            .map(|s| decode_json(6, s))
            .transpose()?,
        error_code: error_code
            .map(|s| decode(7, s, ErrorCode::from_db_string))
            .transpose()?,
        error_message: row.get(8)?,
        attempts: row.get(9)?,
        created_at: parse_timestamp(10, row.get(10)?)?,
        updated_at: parse_timestamp(11, row.get(11)?)?,
    })
}

/// Maps a `REQUEST_COLUMNS` row
fn row_to_request(row: &Row<'_>) -> rusqlite::Result<RequestRecord> {
    let error_code: Option<String> = row.get(5)?;
    Ok(RequestRecord {
        id: row.get(0)?,
        raw_url: row.get(1)?,
        normalized_url: row.get(2)?,
        report_type: decode(3, row.get(3)?, ReportType::from_db_string)?,
        status: decode(4, row.get(4)?, RequestStatus::from_db_string)?,
        error_code: error_code
            .map(|s| decode(5, s, ErrorCode::from_db_string))
            .transpose()?,
        error_message: row.get(6)?,
        submitted_at: parse_timestamp(7, row.get(7)?)?,
        updated_at: parse_timestamp(8, row.get(8)?)?,
    })
}

fn decode<T>(idx: usize, value: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value '{}'", value).into(),
        )
    })
}

fn decode_json(idx: usize, value: String) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width UTC timestamps so text comparison orders them correctly
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn now_rfc3339() -> String {
    format_timestamp(&Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RequestRecord;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(Duration::from_secs(30), 3).unwrap()
    }

    fn short_lease_store(max_attempts: u32) -> SqliteStore {
        SqliteStore::open_in_memory(Duration::from_millis(0), max_attempts).unwrap()
    }

    fn insert_request(store: &SqliteStore) -> RequestRecord {
        let request =
            RequestRecord::received("example.com", "https://example.com", ReportType::Full);
        store.insert_request(&request).unwrap();
        request
    }

    fn fetch_job(request_id: &str) -> NewJob {
        NewJob {
            request_id: request_id.to_string(),
            kind: JobKind::Fetch,
            depends_on: Vec::new(),
            payload: json!({ "url": "https://example.com" }),
        }
    }

    fn analysis_job(request_id: &str, kind: JobKind, fetch_id: &str) -> NewJob {
        NewJob {
            request_id: request_id.to_string(),
            kind,
            depends_on: vec![fetch_id.to_string()],
            payload: json!({}),
        }
    }

    fn wait_for_lease_expiry() {
        std::thread::sleep(Duration::from_millis(5));
    }

    #[test]
    fn test_open_memory_path() {
        let store = SqliteStore::open(MEMORY_PATH, Duration::from_secs(1), 1).unwrap();
        assert!(store.ping().is_ok());
    }

    #[test]
    fn test_enqueue_and_get_job() {
        let store = store();
        let request = insert_request(&store);
        let id = store.enqueue(fetch_job(&request.id)).unwrap();

        let job = store.get_job(&id).unwrap().unwrap();
        assert_eq!(job.kind, JobKind::Fetch);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.payload["url"], "https://example.com");
        assert!(job.depends_on.is_empty());
    }

    #[test]
    fn test_enqueue_for_unknown_request_fails() {
        let store = store();
        assert!(store.enqueue(fetch_job("missing")).is_err());
    }

    #[test]
    fn test_claim_issues_lease() {
        let store = store();
        let request = insert_request(&store);
        let id = store.enqueue(fetch_job(&request.id)).unwrap();

        let claimed = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();
        assert_eq!(claimed.job.id, id);
        assert_eq!(claimed.job.state, JobState::Running);
        assert_eq!(claimed.job.attempts, 1);
        assert_eq!(claimed.lease.worker_id, "fetch-0");

        // Held jobs are not handed out twice
        assert!(store.claim(JobKind::Fetch, "fetch-1").unwrap().is_none());
    }

    #[test]
    fn test_claim_respects_kind() {
        let store = store();
        let request = insert_request(&store);
        store.enqueue(fetch_job(&request.id)).unwrap();

        assert!(store.claim(JobKind::Seo, "seo-0").unwrap().is_none());
    }

    #[test]
    fn test_claim_is_fifo_within_kind() {
        let store = store();
        let first = insert_request(&store);
        let second = insert_request(&store);
        let a = store.enqueue(fetch_job(&first.id)).unwrap();
        let b = store.enqueue(fetch_job(&second.id)).unwrap();

        assert_eq!(store.claim(JobKind::Fetch, "w").unwrap().unwrap().job.id, a);
        assert_eq!(store.claim(JobKind::Fetch, "w").unwrap().unwrap().job.id, b);
    }

    #[test]
    fn test_unmet_dependency_blocks_claim() {
        let store = store();
        let request = insert_request(&store);
        let fetch_id = store.enqueue(fetch_job(&request.id)).unwrap();
        store
            .enqueue(analysis_job(&request.id, JobKind::Seo, &fetch_id))
            .unwrap();

        assert!(store.claim(JobKind::Seo, "seo-0").unwrap().is_none());

        let fetch = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();
        assert!(store.claim(JobKind::Seo, "seo-0").unwrap().is_none());

        store
            .complete(&fetch_id, &fetch.lease.token, &json!({"ok": true}))
            .unwrap();
        let seo = store.claim(JobKind::Seo, "seo-0").unwrap().unwrap();
        assert_eq!(seo.job.depends_on, vec![fetch_id]);
    }

    #[test]
    fn test_failed_dependency_keeps_job_blocked() {
        let store = store();
        let request = insert_request(&store);
        let fetch_id = store.enqueue(fetch_job(&request.id)).unwrap();
        store
            .enqueue(analysis_job(&request.id, JobKind::Performance, &fetch_id))
            .unwrap();

        let fetch = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();
        let failure = JobFailure::new(ErrorCode::FetchTimeout, "timed out");
        assert!(store.fail(&fetch_id, &fetch.lease.token, &failure).unwrap());

        assert!(store.claim(JobKind::Performance, "p").unwrap().is_none());
    }

    #[test]
    fn test_complete_requires_current_lease() {
        let store = store();
        let request = insert_request(&store);
        let id = store.enqueue(fetch_job(&request.id)).unwrap();
        let claimed = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();

        assert!(!store.complete(&id, "not-the-token", &json!(1)).unwrap());
        assert!(store.complete(&id, &claimed.lease.token, &json!(1)).unwrap());

        // A second completion is a no-op
        assert!(!store.complete(&id, &claimed.lease.token, &json!(2)).unwrap());

        let job = store.get_job(&id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.result, Some(json!(1)));
    }

    #[test]
    fn test_fail_records_error() {
        let store = store();
        let request = insert_request(&store);
        let id = store.enqueue(fetch_job(&request.id)).unwrap();
        let claimed = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();

        let failure = JobFailure::new(ErrorCode::FetchHttpError, "HTTP 500");
        assert!(store.fail(&id, &claimed.lease.token, &failure).unwrap());

        let job = store.get_job(&id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure(), Some(failure));
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let store = short_lease_store(3);
        let request = insert_request(&store);
        let id = store.enqueue(fetch_job(&request.id)).unwrap();

        let first = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();
        wait_for_lease_expiry();
        let second = store.claim(JobKind::Fetch, "fetch-1").unwrap().unwrap();

        assert_eq!(second.job.id, id);
        assert_eq!(second.job.attempts, 2);
        assert_ne!(first.lease.token, second.lease.token);

        // The stale holder can no longer complete
        assert!(!store.complete(&id, &first.lease.token, &json!(1)).unwrap());
        assert!(store.complete(&id, &second.lease.token, &json!(2)).unwrap());
    }

    #[test]
    fn test_renewed_lease_is_not_reclaimable() {
        let store = SqliteStore::open_in_memory(Duration::from_millis(200), 3).unwrap();
        let request = insert_request(&store);
        let id = store.enqueue(fetch_job(&request.id)).unwrap();
        let claimed = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();

        std::thread::sleep(Duration::from_millis(120));
        let renewed = store.renew_lease(&id, &claimed.lease.token).unwrap();
        assert!(renewed.unwrap() > claimed.lease.expires_at_ms);

        // Past the original expiry, inside the renewed one
        std::thread::sleep(Duration::from_millis(120));
        assert!(store.claim(JobKind::Fetch, "fetch-1").unwrap().is_none());
        assert!(store.complete(&id, &claimed.lease.token, &json!(1)).unwrap());
        assert_eq!(store.get_job(&id).unwrap().unwrap().attempts, 1);
    }

    #[test]
    fn test_renew_rejects_stale_or_finished_lease() {
        let store = short_lease_store(3);
        let request = insert_request(&store);
        let id = store.enqueue(fetch_job(&request.id)).unwrap();

        let first = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();
        wait_for_lease_expiry();
        let second = store.claim(JobKind::Fetch, "fetch-1").unwrap().unwrap();

        assert_eq!(store.renew_lease(&id, &first.lease.token).unwrap(), None);
        assert!(store.renew_lease(&id, &second.lease.token).unwrap().is_some());

        assert!(store.complete(&id, &second.lease.token, &json!(2)).unwrap());
        assert_eq!(store.renew_lease(&id, &second.lease.token).unwrap(), None);
    }

    #[test]
    fn test_reaper_fails_exhausted_jobs() {
        let store = short_lease_store(1);
        let request = insert_request(&store);
        let id = store.enqueue(fetch_job(&request.id)).unwrap();

        let claimed = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();
        wait_for_lease_expiry();

        // No attempts left: not reclaimable, reaped instead
        assert!(store.claim(JobKind::Fetch, "fetch-1").unwrap().is_none());
        assert_eq!(store.reap_expired().unwrap(), vec![id.clone()]);

        let job = store.get_job(&id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_code, Some(ErrorCode::LeaseExpired));
        assert!(!store.complete(&id, &claimed.lease.token, &json!(1)).unwrap());
    }

    #[test]
    fn test_reaper_ignores_live_leases() {
        let store = store();
        let request = insert_request(&store);
        store.enqueue(fetch_job(&request.id)).unwrap();
        store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();

        assert!(store.reap_expired().unwrap().is_empty());
    }

    #[test]
    fn test_abandon_request_rejects_late_completion() {
        let store = store();
        let request = insert_request(&store);
        let fetch_id = store.enqueue(fetch_job(&request.id)).unwrap();
        let claimed = store.claim(JobKind::Fetch, "fetch-0").unwrap().unwrap();
        store.complete(&fetch_id, &claimed.lease.token, &json!({})).unwrap();

        let seo_id = store
            .enqueue(analysis_job(&request.id, JobKind::Seo, &fetch_id))
            .unwrap();
        store
            .enqueue(analysis_job(&request.id, JobKind::Accessibility, &fetch_id))
            .unwrap();
        let seo = store.claim(JobKind::Seo, "seo-0").unwrap().unwrap();

        let failure = JobFailure::new(ErrorCode::RequestTimeout, "request timed out");
        assert_eq!(store.abandon_request(&request.id, &failure).unwrap(), 2);
        assert!(!store.complete(&seo_id, &seo.lease.token, &json!({})).unwrap());

        let jobs = store.jobs_for_request(&request.id).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].state, JobState::Done);
        assert!(jobs[1..]
            .iter()
            .all(|j| j.error_code == Some(ErrorCode::RequestTimeout)));
    }

    #[test]
    fn test_request_status_update_is_conditional() {
        let store = store();
        let request = insert_request(&store);

        assert!(store
            .update_request_status(
                &request.id,
                RequestStatus::Received,
                RequestStatus::Fetching,
                None
            )
            .unwrap());
        // Stale `from` loses
        assert!(!store
            .update_request_status(
                &request.id,
                RequestStatus::Received,
                RequestStatus::Failed,
                None
            )
            .unwrap());

        let failure = JobFailure::new(ErrorCode::FetchTimeout, "slow");
        assert!(store
            .update_request_status(
                &request.id,
                RequestStatus::Fetching,
                RequestStatus::Failed,
                Some(&failure)
            )
            .unwrap());

        let stored = store.get_request(&request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Failed);
        assert_eq!(stored.failure(), Some(failure));
        assert_eq!(stored.submitted_at, request.submitted_at);
    }

    #[test]
    fn test_active_requests_excludes_terminal() {
        let store = store();
        let active = insert_request(&store);
        let done = insert_request(&store);
        store
            .update_request_status(&done.id, RequestStatus::Received, RequestStatus::Failed, None)
            .unwrap();

        let ids: Vec<String> = store
            .active_requests()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![active.id]);
    }

    #[test]
    fn test_artifact_is_insert_once() {
        let store = store();
        let request = insert_request(&store);

        let mut artifact = FetchArtifact::sample(&request.id, "<html><body>first</body></html>");
        artifact.screenshot = Some(vec![1, 2, 3]);
        assert!(store.put_artifact(&artifact).unwrap());

        let second = FetchArtifact::sample(&request.id, "<html><body>second</body></html>");
        assert!(!store.put_artifact(&second).unwrap());

        let stored = store.get_artifact(&request.id).unwrap().unwrap();
        assert_eq!(stored, artifact);
    }

    #[test]
    fn test_purge_removes_terminal_requests_and_jobs() {
        let store = store();
        let request = insert_request(&store);
        store.enqueue(fetch_job(&request.id)).unwrap();
        store
            .put_artifact(&FetchArtifact::sample(&request.id, "<p>x</p>"))
            .unwrap();
        let live = insert_request(&store);

        store
            .update_request_status(
                &request.id,
                RequestStatus::Received,
                RequestStatus::Failed,
                None,
            )
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.purge_terminal_before(cutoff).unwrap(), 1);

        assert!(store.get_request(&request.id).unwrap().is_none());
        assert!(store.jobs_for_request(&request.id).unwrap().is_empty());
        assert!(store.get_artifact(&request.id).unwrap().is_none());
        assert!(store.get_request(&live.id).unwrap().is_some());
    }

    #[test]
    fn test_counts() {
        let store = store();
        let request = insert_request(&store);
        store.enqueue(fetch_job(&request.id)).unwrap();
        store.enqueue(fetch_job(&request.id)).unwrap();
        store.claim(JobKind::Fetch, "w").unwrap().unwrap();

        let jobs = store.count_jobs().unwrap();
        assert!(jobs.contains(&(JobKind::Fetch, JobState::Queued, 1)));
        assert!(jobs.contains(&(JobKind::Fetch, JobState::Running, 1)));

        assert_eq!(
            store.count_requests().unwrap(),
            vec![(RequestStatus::Received, 1)]
        );
        assert_eq!(store.count_reports().unwrap(), 0);
    }
}
