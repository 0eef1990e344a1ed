use crate::api::models::{AnalyzeRequest, ApiResponse, HealthResponse};
use crate::pipeline::{Outcome, PipelineHandle};
use crate::state::ErrorCode;
use crate::PagescopeError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

/// Shared state of every handler
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: PipelineHandle,
}

/// An error response in the API envelope
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, body: ApiResponse) -> Self {
        Self { status, body }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ApiResponse::error(ErrorCode::InvalidUrl.as_str(), message),
        )
    }
}

impl From<PagescopeError> for ApiError {
    fn from(e: PagescopeError) -> Self {
        if let PagescopeError::RequestNotFound(_) = e {
            return Self::new(
                StatusCode::NOT_FOUND,
                ApiResponse::error("RequestNotFound", e.to_string()),
            );
        }
        let code = e.code();
        Self::new(status_for(code), ApiResponse::error(code.as_str(), e.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP status of a failed request, by error code
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidUrl | ErrorCode::InvalidReportType => StatusCode::BAD_REQUEST,
        ErrorCode::FetchTimeout | ErrorCode::FetchHttpError | ErrorCode::FetchUnreachable => {
            StatusCode::BAD_GATEWAY
        }
        ErrorCode::ArtifactUnusable => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::AnalysisFailed | ErrorCode::LeaseExpired | ErrorCode::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Turns an outcome into the response sent to the caller
fn respond(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Completed(report) => (StatusCode::OK, Json(ApiResponse::report(report))).into_response(),
        Outcome::Failed {
            request_id,
            failure,
        } => ApiError::new(
            status_for(failure.code),
            ApiResponse::error(failure.code.as_str(), failure.message).with_request_id(request_id),
        )
        .into_response(),
        Outcome::Pending { request_id, status } => (
            StatusCode::ACCEPTED,
            Json(
                ApiResponse::error(
                    "Pending",
                    format!("Request is still {}; poll /api/accessibility/requests/{}", status, request_id),
                )
                .with_request_id(request_id),
            ),
        )
            .into_response(),
    }
}

/// `POST /api/accessibility/analyze`
///
/// Submits the request and holds the connection until it is terminal or the
/// configured wait elapses.
pub async fn analyze(
    State(state): State<ApiState>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body.map_err(|e| {
        debug!("Rejected analyze body: {}", e);
        ApiError::bad_request(format!("Request body must be JSON with a url field: {}", e.body_text()))
    })?;

    let outcome = state
        .pipeline
        .analyze(&req.url, req.report_type.as_deref())
        .await
        .map_err(|e| {
            if e.code() == ErrorCode::QueueUnavailable {
                warn!("Queue unavailable: {}", e);
            }
            ApiError::from(e)
        })?;

    Ok(respond(outcome))
}

/// `GET /api/accessibility/requests/{id}`
pub async fn request_status(
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = state.pipeline.status(&request_id)?;
    Ok(respond(outcome))
}

/// `GET /api/health`
pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    match state.pipeline.ping() {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                queue: "reachable".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    queue: "unreachable".to_string(),
                    error: Some(ErrorCode::QueueUnavailable.as_str().to_string()),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_for_codes() {
        assert_eq!(status_for(ErrorCode::InvalidUrl), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::FetchHttpError), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorCode::FetchTimeout), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorCode::ArtifactUnusable),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(ErrorCode::RequestTimeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(ErrorCode::QueueUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(ErrorCode::AnalysisFailed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_error() {
        let err = ApiError::from(PagescopeError::RequestNotFound("abc".to_string()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.body.error.as_deref(), Some("RequestNotFound"));
    }
}
