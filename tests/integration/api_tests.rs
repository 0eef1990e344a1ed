//! Integration tests for the HTTP API
//!
//! The router is driven with `tower::ServiceExt::oneshot` over a pipeline
//! running in-process against a wiremock target site.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use pagescope::api::{router, ApiResponse, HealthResponse};
use pagescope::config::Config;
use pagescope::fetcher::FetchArtifact;
use pagescope::pipeline::{Pipeline, PipelineHandle, Report};
use pagescope::queue::{
    ClaimedJob, JobFailure, JobKind, JobQueue, JobRecord, NewJob, QueueError, QueueResult,
    RequestRecord, RequestStore, SqliteStore, Store, WorkQueue,
};
use pagescope::{JobState, RequestStatus};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<html lang="en"><head><title>API test page with a reasonable title</title>
<meta name="viewport" content="width=device-width"></head>
<body><main><h1>Hello</h1><p>World</p></main></body></html>"#;

fn test_config() -> Config {
    let mut config = Config::default();
    config.queue.poll_interval_ms = 20;
    config.pipeline.tick_interval_ms = 20;
    config.server.max_wait_ms = 15_000;
    config.fetcher.retry_delay_ms = 10;
    config.workers.fetch = 1;
    config.workers.accessibility = 1;
    config.workers.seo = 1;
    config.workers.performance = 1;
    config
}

async fn start(config: &Config) -> (Pipeline, Router) {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open_in_memory(config.queue.lease(), config.queue.max_attempts)
            .expect("Failed to open queue"),
    );
    let pipeline = Pipeline::start_with_store(config, store)
        .await
        .expect("Failed to start pipeline");
    let app = router(pipeline.handle());
    (pipeline, app)
}

fn analyze_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/accessibility/analyze")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_ok() {
    let (pipeline, app) = start(&test_config()).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.queue, "reachable");
    assert_eq!(health.error, None);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_analyze_returns_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PAGE)
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let (pipeline, app) = start(&test_config()).await;
    let body = json!({ "url": server.uri(), "reportType": "detailed" }).to_string();
    let (status, body) = send(&app, analyze_request(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["requestId"].is_string());
    assert!(body["data"]["summary"]["totalViolations"].is_u64());
    assert!(body["data"]["summary"]["bySeverity"].is_object());
    assert!(body["data"]["generatedAt"].is_string());
    assert!(body["data"].get("request_id").is_none());
    let response: ApiResponse = serde_json::from_value(body).unwrap();
    assert!(response.success);
    let report = response.data.expect("report in data");
    assert_eq!(report.url, server.uri());
    assert!(report.findings.is_some());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_invalid_url_is_bad_request() {
    let (pipeline, app) = start(&test_config()).await;

    let body = json!({ "url": "ftp://example.com" }).to_string();
    let (status, body) = send(&app, analyze_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "InvalidUrl");
    assert!(body["message"].is_string());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_unknown_report_type_is_bad_request() {
    let (pipeline, app) = start(&test_config()).await;

    let body = json!({ "url": "example.com", "reportType": "everything" }).to_string();
    let (status, body) = send(&app, analyze_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidReportType");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (pipeline, app) = start(&test_config()).await;

    let (status, body) = send(&app, analyze_request("{not json".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, analyze_request(json!({ "site": "x" }).to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_upstream_error_is_bad_gateway() {
    // Every path answers 404
    let server = MockServer::start().await;

    let (pipeline, app) = start(&test_config()).await;
    let body = json!({ "url": server.uri() }).to_string();
    let (status, body) = send(&app, analyze_request(body)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "FetchHttpError");
    assert!(body["requestId"].is_string());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_wait_exceeded_is_accepted_then_pollable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PAGE)
                .insert_header("content-type", "text/html")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut config = test_config();
    config.server.max_wait_ms = 50;
    let (pipeline, app) = start(&config).await;

    let body = json!({ "url": server.uri(), "reportType": "seo" }).to_string();
    let (status, body) = send(&app, analyze_request(body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["error"], "Pending");
    let request_id = body["requestId"].as_str().unwrap().to_string();

    let poll = || {
        Request::builder()
            .uri(format!("/api/accessibility/requests/{}", request_id))
            .body(Body::empty())
            .unwrap()
    };

    let mut last = StatusCode::ACCEPTED;
    for _ in 0..100 {
        let (status, body) = send(&app, poll()).await;
        last = status;
        if status == StatusCode::OK {
            assert_eq!(body["data"]["requestId"], request_id.as_str());
            assert!(body["data"]["scores"]["seo"].is_number());
            break;
        }
        assert_eq!(status, StatusCode::ACCEPTED);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(last, StatusCode::OK);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_unknown_request_is_not_found() {
    let (pipeline, app) = start(&test_config()).await;

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/accessibility/requests/does-not-exist")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "RequestNotFound");

    pipeline.shutdown().await;
}

/// A store whose backing database is gone
#[derive(Default)]
struct DownStore {
    inserts: AtomicUsize,
}

fn down<T>() -> QueueResult<T> {
    Err(QueueError::Unavailable("database is down".to_string()))
}

impl JobQueue for DownStore {
    fn enqueue(&self, _job: NewJob) -> QueueResult<String> {
        down()
    }

    fn claim(&self, _kind: JobKind, _worker_id: &str) -> QueueResult<Option<ClaimedJob>> {
        down()
    }

    fn renew_lease(&self, _job_id: &str, _lease_token: &str) -> QueueResult<Option<i64>> {
        down()
    }

    fn complete(&self, _job_id: &str, _lease_token: &str, _result: &Value) -> QueueResult<bool> {
        down()
    }

    fn fail(&self, _job_id: &str, _lease_token: &str, _failure: &JobFailure) -> QueueResult<bool> {
        down()
    }

    fn get_job(&self, _job_id: &str) -> QueueResult<Option<JobRecord>> {
        down()
    }

    fn jobs_for_request(&self, _request_id: &str) -> QueueResult<Vec<JobRecord>> {
        down()
    }

    fn abandon_request(&self, _request_id: &str, _failure: &JobFailure) -> QueueResult<usize> {
        down()
    }

    fn reap_expired(&self) -> QueueResult<Vec<String>> {
        down()
    }

    fn ping(&self) -> QueueResult<()> {
        down()
    }
}

impl RequestStore for DownStore {
    fn insert_request(&self, _request: &RequestRecord) -> QueueResult<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        down()
    }

    fn get_request(&self, _request_id: &str) -> QueueResult<Option<RequestRecord>> {
        down()
    }

    fn active_requests(&self) -> QueueResult<Vec<RequestRecord>> {
        down()
    }

    fn update_request_status(
        &self,
        _request_id: &str,
        _from: RequestStatus,
        _to: RequestStatus,
        _failure: Option<&JobFailure>,
    ) -> QueueResult<bool> {
        down()
    }

    fn purge_terminal_before(&self, _cutoff: DateTime<Utc>) -> QueueResult<usize> {
        down()
    }

    fn put_artifact(&self, _artifact: &FetchArtifact) -> QueueResult<bool> {
        down()
    }

    fn get_artifact(&self, _request_id: &str) -> QueueResult<Option<FetchArtifact>> {
        down()
    }

    fn put_report(&self, _report: &Report) -> QueueResult<bool> {
        down()
    }

    fn get_report(&self, _request_id: &str) -> QueueResult<Option<Report>> {
        down()
    }

    fn count_jobs(&self) -> QueueResult<Vec<(JobKind, JobState, u64)>> {
        down()
    }

    fn count_requests(&self) -> QueueResult<Vec<(RequestStatus, u64)>> {
        down()
    }

    fn count_reports(&self) -> QueueResult<u64> {
        down()
    }
}

fn router_over(store: Arc<dyn Store>) -> Router {
    let poll = Duration::from_millis(20);
    let handle = PipelineHandle::new(WorkQueue::new(store, poll), Duration::from_secs(10), poll);
    router(handle)
}

#[tokio::test]
async fn test_health_reports_queue_down() {
    let app = router_over(Arc::new(DownStore::default()));

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unavailable");
    assert_eq!(body["queue"], "unreachable");
    assert_eq!(body["error"], "QueueUnavailable");
}

#[tokio::test]
async fn test_analyze_fails_fast_when_queue_down() {
    let store = Arc::new(DownStore::default());
    let app = router_over(store.clone());

    let started = Instant::now();
    let body = json!({ "url": "example.com" }).to_string();
    let (status, body) = send(&app, analyze_request(body)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "QueueUnavailable");
    assert!(body["message"].is_string());

    // Answered at once, after a single attempt
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
}
