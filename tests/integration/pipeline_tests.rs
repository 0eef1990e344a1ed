//! Integration tests for the analysis pipeline
//!
//! These tests use wiremock to stand in for the target site and run the full
//! fetch, fan-out, analysis and aggregation cycle in-process.

use pagescope::config::Config;
use pagescope::pipeline::{Outcome, Pipeline, Report};
use pagescope::queue::{JobKind, SqliteStore, Store};
use pagescope::{ErrorCode, RequestStatus};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>Example Domain for Integration Tests</title>
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <meta name="description" content="An example page used by the pipeline integration tests to exercise every analysis worker.">
</head>
<body>
  <main>
    <h1>Example Domain</h1>
    <p>This domain is for use in illustrative examples.</p>
    <img src="/logo.png">
    <a href="/more">More information</a>
  </main>
</body>
</html>"#;

const EMPTY_BODY: &str = r#"<html lang="en"><head><title>App shell</title>
<meta name="viewport" content="width=device-width"></head><body></body></html>"#;

/// Creates a configuration tuned for fast tests
fn test_config() -> Config {
    let mut config = Config::default();
    config.queue.poll_interval_ms = 20;
    config.pipeline.tick_interval_ms = 20;
    config.server.max_wait_ms = 15_000;
    config.fetcher.navigation_timeout_ms = 5_000;
    config.fetcher.retry_delay_ms = 10;
    config.workers.fetch = 1;
    config.workers.accessibility = 1;
    config.workers.seo = 1;
    config.workers.performance = 1;
    config
}

async fn start(config: &Config) -> (Pipeline, Arc<dyn Store>) {
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open_in_memory(config.queue.lease(), config.queue.max_attempts)
            .expect("Failed to open queue"),
    );
    let pipeline = Pipeline::start_with_store(config, store.clone())
        .await
        .expect("Failed to start pipeline");
    (pipeline, store)
}

async fn serve_page(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nAllow: /\n")
                .insert_header("content-type", "text/plain"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

fn completed(outcome: Outcome) -> Box<Report> {
    match outcome {
        Outcome::Completed(report) => report,
        other => panic!("Expected a completed request, got {:?}", other),
    }
}

fn failed(outcome: Outcome) -> (String, ErrorCode) {
    match outcome {
        Outcome::Failed {
            request_id,
            failure,
        } => (request_id, failure.code),
        other => panic!("Expected a failed request, got {:?}", other),
    }
}

#[tokio::test]
async fn test_full_report_for_served_page() {
    let server = MockServer::start().await;
    serve_page(&server, PAGE).await;

    let (pipeline, store) = start(&test_config()).await;
    let outcome = pipeline
        .handle()
        .analyze(&server.uri(), None)
        .await
        .expect("analyze failed");
    let report = completed(outcome);

    assert_eq!(report.url, server.uri());
    assert_eq!(report.status, RequestStatus::Completed);
    assert!(report.scores.overall >= 0.0 && report.scores.overall <= 100.0);
    assert!(report.scores.accessibility.is_some());
    assert!(report.scores.seo.is_some());
    assert!(report.scores.performance.is_some());
    assert!(report.failures.is_empty());

    let findings = report.findings.as_ref().expect("full report has findings");
    let total: usize = findings.values().map(|f| f.len()).sum();
    assert_eq!(report.summary.total_violations, total);

    // The image without alt text is reported
    assert!(findings[&JobKind::Accessibility]
        .iter()
        .any(|f| f.rule_id == "image-alt"));

    // One fetch plus three analysis jobs, all done
    let jobs = store.jobs_for_request(&report.request_id).unwrap();
    assert_eq!(jobs.len(), 4);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_http_error_fails_without_analysis() {
    // Nothing is mounted, so every path answers 404
    let server = MockServer::start().await;

    let (pipeline, store) = start(&test_config()).await;
    let outcome = pipeline
        .handle()
        .analyze(&server.uri(), None)
        .await
        .expect("analyze failed");

    let (request_id, code) = failed(outcome);
    assert_eq!(code, ErrorCode::FetchHttpError);

    let jobs = store.jobs_for_request(&request_id).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Fetch);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_slow_site_fails_with_fetch_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PAGE)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut config = test_config();
    config.fetcher.navigation_timeout_ms = 300;
    config.fetcher.max_retries = 1;

    let (pipeline, store) = start(&config).await;
    let outcome = pipeline
        .handle()
        .analyze(&server.uri(), None)
        .await
        .expect("analyze failed");

    let (request_id, code) = failed(outcome);
    assert_eq!(code, ErrorCode::FetchTimeout);
    assert_eq!(store.jobs_for_request(&request_id).unwrap().len(), 1);

    pipeline.shutdown().await;
}

/// Counts the requests the mock site saw for `path`
async fn hits(server: &MockServer, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == path)
        .count()
}

#[tokio::test]
async fn test_default_ratios_fail_fetch_with_timeout_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    // The shipped defaults at 1/50 scale
    let defaults = Config::default();
    let mut config = test_config();
    config.fetcher.navigation_timeout_ms = defaults.fetcher.navigation_timeout_ms / 50;
    config.fetcher.retry_delay_ms = defaults.fetcher.retry_delay_ms / 50;
    config.fetcher.max_retries = defaults.fetcher.max_retries;
    config.queue.lease_ms = defaults.queue.lease_ms / 50;
    config.pipeline.request_timeout_ms = defaults.pipeline.request_timeout_ms / 50;
    config.workers.fetch = 2;
    pagescope::config::validate(&config).expect("scaled defaults are valid");

    let (pipeline, store) = start(&config).await;
    let outcome = pipeline
        .handle()
        .analyze(&server.uri(), None)
        .await
        .expect("analyze failed");

    let (request_id, code) = failed(outcome);
    assert_eq!(code, ErrorCode::FetchTimeout);
    assert_eq!(store.jobs_for_request(&request_id).unwrap().len(), 1);
    assert_eq!(hits(&server, "/").await, 3);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_lease_shorter_than_fetch_is_renewed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    // Three 400ms attempts against a 600ms lease, with a second fetch worker
    // ready to pick the job up if the lease lapsed
    let mut config = test_config();
    config.fetcher.navigation_timeout_ms = 400;
    config.fetcher.retry_delay_ms = 10;
    config.fetcher.max_retries = 2;
    config.queue.lease_ms = 600;
    config.workers.fetch = 2;

    let (pipeline, store) = start(&config).await;
    let outcome = pipeline
        .handle()
        .analyze(&server.uri(), None)
        .await
        .expect("analyze failed");

    let (request_id, code) = failed(outcome);
    assert_eq!(code, ErrorCode::FetchTimeout);

    let jobs = store.jobs_for_request(&request_id).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attempts, 1);
    assert_eq!(hits(&server, "/").await, 3);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_empty_body_yields_partial_report() {
    let server = MockServer::start().await;
    serve_page(&server, EMPTY_BODY).await;

    let (pipeline, _store) = start(&test_config()).await;
    let outcome = pipeline
        .handle()
        .analyze(&server.uri(), None)
        .await
        .expect("analyze failed");
    let report = completed(outcome);

    assert_eq!(report.scores.accessibility, None);
    assert_eq!(
        report.failures.get(&JobKind::Accessibility),
        Some(&ErrorCode::ArtifactUnusable)
    );
    assert_eq!(
        report.summary.domains_analyzed,
        vec![JobKind::Seo, JobKind::Performance]
    );

    // Equal default weights for the two remaining domains make this a plain mean
    let seo = report.scores.seo.expect("seo score") as f64;
    let performance = report.scores.performance.expect("performance score") as f64;
    let expected = ((seo + performance) / 2.0 * 10.0).round() / 10.0;
    assert_eq!(report.scores.overall, expected);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_summary_report_omits_findings() {
    let server = MockServer::start().await;
    serve_page(&server, PAGE).await;

    let (pipeline, _store) = start(&test_config()).await;
    let outcome = pipeline
        .handle()
        .analyze(&server.uri(), Some("summary"))
        .await
        .expect("analyze failed");
    let report = completed(outcome);

    assert!(report.findings.is_none());
    assert_eq!(report.summary.domains_analyzed.len(), 3);
    assert!(report.summary.total_violations > 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_single_domain_report() {
    let server = MockServer::start().await;
    serve_page(&server, PAGE).await;

    let (pipeline, store) = start(&test_config()).await;
    let outcome = pipeline
        .handle()
        .analyze(&server.uri(), Some("performance"))
        .await
        .expect("analyze failed");
    let report = completed(outcome);

    assert!(report.scores.performance.is_some());
    assert_eq!(report.scores.accessibility, None);
    assert_eq!(report.scores.seo, None);
    assert_eq!(
        report.scores.overall,
        report.scores.performance.unwrap() as f64
    );

    let kinds: Vec<JobKind> = store
        .jobs_for_request(&report.request_id)
        .unwrap()
        .iter()
        .map(|j| j.kind)
        .collect();
    assert_eq!(kinds, vec![JobKind::Fetch, JobKind::Performance]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_stored_report_is_stable() {
    let server = MockServer::start().await;
    serve_page(&server, PAGE).await;

    let (pipeline, _store) = start(&test_config()).await;
    let handle = pipeline.handle();
    let report = completed(handle.analyze(&server.uri(), None).await.unwrap());

    let first = serde_json::to_string(&report).unwrap();
    let again = completed(handle.status(&report.request_id).unwrap());
    let second = serde_json::to_string(&again).unwrap();
    assert_eq!(first, second);

    pipeline.shutdown().await;
}
