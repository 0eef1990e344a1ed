use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried by failed jobs, failed requests and API error bodies
///
/// Serialized with the variant name as-is (`"FetchTimeout"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidUrl,
    InvalidReportType,
    FetchTimeout,
    FetchHttpError,
    FetchUnreachable,
    ArtifactUnusable,
    AnalysisFailed,
    LeaseExpired,
    RequestTimeout,
    QueueUnavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "InvalidUrl",
            Self::InvalidReportType => "InvalidReportType",
            Self::FetchTimeout => "FetchTimeout",
            Self::FetchHttpError => "FetchHttpError",
            Self::FetchUnreachable => "FetchUnreachable",
            Self::ArtifactUnusable => "ArtifactUnusable",
            Self::AnalysisFailed => "AnalysisFailed",
            Self::LeaseExpired => "LeaseExpired",
            Self::RequestTimeout => "RequestTimeout",
            Self::QueueUnavailable => "QueueUnavailable",
            Self::Internal => "Internal",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        Self::all_codes().into_iter().find(|code| code.as_str() == s)
    }

    /// Returns true for failures that originate at the target site
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Self::FetchTimeout | Self::FetchHttpError | Self::FetchUnreachable
        )
    }

    /// Ranks how much a code tells the caller about the root cause
    ///
    /// When several analysis jobs fail the request surfaces the highest
    /// ranked code; ties keep the first job in kind order.
    pub fn specificity(&self) -> u8 {
        match self {
            Self::ArtifactUnusable => 4,
            Self::AnalysisFailed => 3,
            Self::LeaseExpired | Self::RequestTimeout => 2,
            Self::FetchTimeout | Self::FetchHttpError | Self::FetchUnreachable => 2,
            Self::InvalidUrl | Self::InvalidReportType | Self::QueueUnavailable => 1,
            Self::Internal => 0,
        }
    }

    pub fn all_codes() -> Vec<Self> {
        vec![
            Self::InvalidUrl,
            Self::InvalidReportType,
            Self::FetchTimeout,
            Self::FetchHttpError,
            Self::FetchUnreachable,
            Self::ArtifactUnusable,
            Self::AnalysisFailed,
            Self::LeaseExpired,
            Self::RequestTimeout,
            Self::QueueUnavailable,
            Self::Internal,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
