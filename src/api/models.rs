use crate::pipeline::Report;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/accessibility/analyze`
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub url: String,
    #[serde(rename = "reportType", default)]
    pub report_type: Option<String>,
}

/// Envelope shared by every analysis endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<Report>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set when the caller can poll for the outcome later
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiResponse {
    pub fn report(report: Box<Report>) -> Self {
        Self {
            success: true,
            data: Some(report),
            error: None,
            message: None,
            request_id: None,
        }
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: Some(message.into()),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Body of `GET /api/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue: String,
    /// Error code when the queue does not answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
