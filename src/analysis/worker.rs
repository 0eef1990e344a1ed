use crate::analysis::{analyze, analyzer_for, AnalysisError, AnalysisResult, Analyzer, DomainResult};
use crate::fetcher::FetchArtifact;
use crate::queue::{JobFailure, JobKind, JobRecord, Store};
use crate::worker::JobHandler;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Handles analysis jobs of one kind
///
/// The battery runs on the blocking pool: the parsed DOM is not `Send` and
/// large documents take real CPU time.
pub struct AnalysisHandler {
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn Store>,
}

impl AnalysisHandler {
    /// Creates a handler for an analysis kind
    ///
    /// # Returns
    ///
    /// * `Ok(AnalysisHandler)` - Ready handler
    /// * `Err(AnalysisError::UnsupportedKind)` - `kind` is not an analysis kind
    pub fn new(kind: JobKind, store: Arc<dyn Store>) -> AnalysisResult<Self> {
        let analyzer = analyzer_for(kind).ok_or(AnalysisError::UnsupportedKind(kind))?;
        Ok(Self {
            analyzer: Arc::from(analyzer),
            store,
        })
    }

    /// Loads the artifact and runs the battery
    async fn run(&self, job: &JobRecord) -> AnalysisResult<DomainResult> {
        let artifact: Arc<FetchArtifact> = self
            .store
            .get_artifact(&job.request_id)?
            .map(Arc::new)
            .ok_or_else(|| AnalysisError::ArtifactMissing(job.request_id.clone()))?;

        let analyzer = self.analyzer.clone();
        tokio::task::spawn_blocking(move || analyze(analyzer.as_ref(), &artifact))
            .await
            .map_err(|e| AnalysisError::Task(e.to_string()))?
    }
}

#[async_trait]
impl JobHandler for AnalysisHandler {
    fn kind(&self) -> JobKind {
        self.analyzer.kind()
    }

    async fn handle(&self, job: &JobRecord) -> Result<serde_json::Value, JobFailure> {
        let result = self
            .run(job)
            .await
            .map_err(|e| JobFailure::new(e.code(), e.to_string()))?;

        debug!(
            request_id = %job.request_id,
            kind = %result.kind,
            score = result.score,
            findings = result.findings.len(),
            "Analysis finished"
        );

        serde_json::to_value(&result).map_err(|e| {
            let e = AnalysisError::from(e);
            JobFailure::new(e.code(), e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReportType;
    use crate::queue::{RequestRecord, RequestStore, SqliteStore};
    use crate::state::{ErrorCode, JobState};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn setup(html: Option<&str>) -> (Arc<SqliteStore>, JobRecord) {
        let store = Arc::new(SqliteStore::open_in_memory(Duration::from_secs(30), 3).unwrap());
        let request =
            RequestRecord::received("example.com", "https://example.com", ReportType::Full);
        store.insert_request(&request).unwrap();
        if let Some(html) = html {
            store
                .put_artifact(&FetchArtifact::sample(&request.id, html))
                .unwrap();
        }

        let job = JobRecord {
            id: "job-a".to_string(),
            seq: 2,
            request_id: request.id,
            kind: JobKind::Accessibility,
            depends_on: vec!["job-f".to_string()],
            state: JobState::Running,
            payload: json!({}),
            result: None,
            error_code: None,
            error_message: None,
            attempts: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        (store, job)
    }

    #[test]
    fn test_fetch_kind_rejected() {
        let store = Arc::new(SqliteStore::open_in_memory(Duration::from_secs(30), 3).unwrap());
        assert!(AnalysisHandler::new(JobKind::Fetch, store).is_err());
    }

    #[tokio::test]
    async fn test_handle_returns_domain_result() {
        let (store, job) = setup(Some(
            "<html lang=\"en\"><head><title>t</title></head><body><main><img src=\"/a.png\"></main></body></html>",
        ));
        let handler = AnalysisHandler::new(JobKind::Accessibility, store).unwrap();

        let value = handler.handle(&job).await.unwrap();
        let result: DomainResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.kind, JobKind::Accessibility);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].rule_id, "image-alt");
        assert_eq!(result.score, 85);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_unusable() {
        let (store, job) = setup(None);
        let handler = AnalysisHandler::new(JobKind::Seo, store).unwrap();

        let failure = handler.handle(&job).await.unwrap_err();
        assert_eq!(failure.code, ErrorCode::ArtifactUnusable);
    }

    #[tokio::test]
    async fn test_empty_body_fails_accessibility_only() {
        let html = "<html><head><title>App</title><meta name=\"viewport\" content=\"width=device-width\"></head><body></body></html>";
        let (store, job) = setup(Some(html));

        let accessibility = AnalysisHandler::new(JobKind::Accessibility, store.clone()).unwrap();
        let failure = accessibility.handle(&job).await.unwrap_err();
        assert_eq!(failure.code, ErrorCode::ArtifactUnusable);

        let seo = AnalysisHandler::new(JobKind::Seo, store.clone()).unwrap();
        assert!(seo.handle(&job).await.is_ok());

        let performance = AnalysisHandler::new(JobKind::Performance, store).unwrap();
        assert!(performance.handle(&job).await.is_ok());
    }
}
