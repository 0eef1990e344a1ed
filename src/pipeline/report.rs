use crate::analysis::{Finding, Severity};
use crate::queue::JobKind;
use crate::state::{ErrorCode, RequestStatus};
use crate::PagescopeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which sections a caller asked for
///
/// Selects the analysis jobs fanned out for a request; it never changes how
/// the page is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    /// Every domain with findings
    #[serde(alias = "detailed")]
    Full,
    /// Every domain, scores and counts only
    Summary,
    Accessibility,
    Seo,
    Performance,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Summary => "summary",
            Self::Accessibility => "accessibility",
            Self::Seo => "seo",
            Self::Performance => "performance",
        }
    }

    /// Parses a stored or user-supplied value
    ///
    /// Case-insensitive; `detailed` is accepted as an alias of `full`.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "detailed" => Some(Self::Full),
            "summary" => Some(Self::Summary),
            "accessibility" => Some(Self::Accessibility),
            "seo" => Some(Self::Seo),
            "performance" => Some(Self::Performance),
            _ => None,
        }
    }

    /// Parses the optional `reportType` of an API request
    ///
    /// # Returns
    ///
    /// * `Ok(ReportType)` - `Full` when absent
    /// * `Err(PagescopeError::InvalidReportType)` - Unknown value
    pub fn parse(value: Option<&str>) -> Result<Self, PagescopeError> {
        match value {
            None => Ok(Self::Full),
            Some(v) => {
                Self::from_db_string(v).ok_or_else(|| PagescopeError::InvalidReportType(v.to_string()))
            }
        }
    }

    /// The analysis kinds fanned out for this report type
    pub fn kinds(&self) -> Vec<JobKind> {
        match self {
            Self::Full | Self::Summary => JobKind::ANALYSIS.to_vec(),
            Self::Accessibility => vec![JobKind::Accessibility],
            Self::Seo => vec![JobKind::Seo],
            Self::Performance => vec![JobKind::Performance],
        }
    }

    /// Returns true if the report carries individual findings
    pub fn includes_findings(&self) -> bool {
        !matches!(self, Self::Summary)
    }

    pub fn all_types() -> Vec<Self> {
        vec![
            Self::Full,
            Self::Summary,
            Self::Accessibility,
            Self::Seo,
            Self::Performance,
        ]
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall and per-domain scores, 0-100
///
/// A domain that was not analyzed, or whose analysis failed, has no score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub overall: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<u32>,
}

impl Scores {
    /// Returns the score of one domain
    pub fn domain(&self, kind: JobKind) -> Option<u32> {
        match kind {
            JobKind::Accessibility => self.accessibility,
            JobKind::Seo => self.seo,
            JobKind::Performance => self.performance,
            JobKind::Fetch => None,
        }
    }
}

/// Counts across every analyzed domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Number of findings across all domains
    pub total_violations: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub domains_analyzed: Vec<JobKind>,
    pub domains_failed: Vec<JobKind>,
}

/// The assembled result of one request
///
/// Immutable once built; stored once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub request_id: String,
    pub url: String,
    pub report_type: ReportType,
    pub status: RequestStatus,
    pub scores: Scores,
    pub summary: Summary,
    /// Findings grouped by domain; absent for summary reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<BTreeMap<JobKind, Vec<Finding>>>,
    /// Error code of every domain that failed
    pub failures: BTreeMap<JobKind, ErrorCode>,
    pub generated_at: DateTime<Utc>,
}
