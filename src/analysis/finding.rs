use crate::queue::JobKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How bad a finding is
///
/// `Error` marks a check that could not run; it carries no penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Serious,
    Moderate,
    Minor,
    Info,
    Error,
}

impl Severity {
    /// Points deducted from a domain score per finding
    pub fn penalty(&self) -> u32 {
        match self {
            Self::Critical => 15,
            Self::Serious => 8,
            Self::Moderate => 4,
            Self::Minor => 1,
            Self::Info | Self::Error => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Serious => "serious",
            Self::Moderate => "moderate",
            Self::Minor => "minor",
            Self::Info => "info",
            Self::Error => "error",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::Critical,
            Self::Serious,
            Self::Moderate,
            Self::Minor,
            Self::Info,
            Self::Error,
        ]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation made by a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub worker_kind: JobKind,
    pub rule_id: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A finding before it is attributed to a worker and rule
///
/// Checks return issues; the battery runner stamps the kind and rule id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub severity: Severity,
    pub description: String,
    pub location: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            location: None,
        }
    }

    /// Attaches where on the page the issue was seen
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attributes the issue to `kind`/`rule_id`
    pub fn into_finding(self, kind: JobKind, rule_id: &str) -> Finding {
        Finding {
            worker_kind: kind,
            rule_id: rule_id.to_string(),
            severity: self.severity,
            description: self.description,
            location: self.location,
        }
    }
}

/// Computes a domain score from its findings
///
/// `100 - sum(penalties)`, floored at 0.
pub fn domain_score(findings: &[Finding]) -> u32 {
    let penalty: u32 = findings.iter().map(|f| f.severity.penalty()).sum();
    100u32.saturating_sub(penalty)
}
