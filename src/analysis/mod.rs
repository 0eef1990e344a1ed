//! Analysis module
//!
//! This module turns a fetch artifact into scored findings:
//! - A fixed battery of checks per analysis kind
//! - Per-check isolation: a check that errors or panics becomes an `error`
//!   finding and the rest of the battery still runs
//! - Domain scores derived from finding severities
//! - The job handler analysis workers run

mod accessibility;
mod document;
mod finding;
mod performance;
mod seo;
mod worker;

pub use accessibility::AccessibilityAnalyzer;
pub use document::{attr, describe, element_text, PageDocument};
pub use finding::{domain_score, Finding, Issue, Severity};
pub use performance::PerformanceAnalyzer;
pub use seo::SeoAnalyzer;
pub use worker::AnalysisHandler;

use crate::fetcher::FetchArtifact;
use crate::queue::{JobKind, QueueError};
use crate::state::ErrorCode;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Errors that can occur while analyzing an artifact
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No fetch artifact for request {0}")]
    ArtifactMissing(String),

    #[error("Artifact cannot be analyzed: {0}")]
    ArtifactUnusable(String),

    #[error("{0} has no analyzer")]
    UnsupportedKind(JobKind),

    #[error("Analysis task failed: {0}")]
    Task(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnalysisError {
    /// Maps this error onto the wire-level error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ArtifactMissing(_) | Self::ArtifactUnusable(_) => ErrorCode::ArtifactUnusable,
            Self::Queue(e) => e.code(),
            Self::UnsupportedKind(_) | Self::Task(_) | Self::Serialization(_) => {
                ErrorCode::AnalysisFailed
            }
        }
    }
}

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Signature every check implements
pub type CheckFn = fn(&PageDocument<'_>) -> Result<Vec<Issue>, String>;

/// One named check in a battery
#[derive(Clone, Copy)]
pub struct Check {
    /// Rule id stamped on every finding the check emits
    pub id: &'static str,
    pub run: CheckFn,
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("id", &self.id).finish()
    }
}

/// A fixed battery of checks for one analysis kind
pub trait Analyzer: Send + Sync {
    /// The job kind this analyzer serves
    fn kind(&self) -> JobKind;

    /// The checks, in the order they run and report
    fn checks(&self) -> &'static [Check];

    /// Rejects documents this analyzer cannot meaningfully evaluate
    ///
    /// Runs after the artifact-level usability check.
    fn validate(&self, _doc: &PageDocument<'_>) -> Result<(), String> {
        Ok(())
    }
}

/// Output of one analysis job, stored as the job result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResult {
    pub kind: JobKind,
    /// 0-100
    pub score: u32,
    pub findings: Vec<Finding>,
}

/// Returns the analyzer for an analysis kind
///
/// # Returns
///
/// * `Some(Box<dyn Analyzer>)` - For accessibility, seo and performance
/// * `None` - For `fetch`
pub fn analyzer_for(kind: JobKind) -> Option<Box<dyn Analyzer>> {
    match kind {
        JobKind::Accessibility => Some(Box::new(AccessibilityAnalyzer)),
        JobKind::Seo => Some(Box::new(SeoAnalyzer)),
        JobKind::Performance => Some(Box::new(PerformanceAnalyzer)),
        JobKind::Fetch => None,
    }
}

/// Runs every check of a battery against a document
///
/// Findings keep battery order, then the order each check emitted them.
pub fn run_battery(kind: JobKind, checks: &[Check], doc: &PageDocument<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();

    for check in checks {
        let outcome = catch_unwind(AssertUnwindSafe(|| (check.run)(doc)));

        match outcome {
            Ok(Ok(issues)) => {
                findings.extend(issues.into_iter().map(|i| i.into_finding(kind, check.id)));
            }
            Ok(Err(message)) => {
                tracing::warn!(kind = %kind, check = check.id, "Check errored: {}", message);
                findings.push(
                    Issue::new(Severity::Error, format!("check could not run: {}", message))
                        .into_finding(kind, check.id),
                );
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(kind = %kind, check = check.id, "Check panicked: {}", message);
                findings.push(
                    Issue::new(Severity::Error, format!("check panicked: {}", message))
                        .into_finding(kind, check.id),
                );
            }
        }
    }

    findings
}

/// Analyzes an artifact with one analyzer
///
/// # Arguments
///
/// * `analyzer` - The battery to run
/// * `artifact` - The shared fetch artifact
///
/// # Returns
///
/// * `Ok(DomainResult)` - Score and findings
/// * `Err(AnalysisError::ArtifactUnusable)` - Nothing analyzable in the artifact
pub fn analyze(analyzer: &dyn Analyzer, artifact: &FetchArtifact) -> AnalysisResult<DomainResult> {
    if let Some(reason) = artifact.unusable_reason() {
        return Err(AnalysisError::ArtifactUnusable(reason));
    }

    let doc = PageDocument::parse(artifact);
    analyzer
        .validate(&doc)
        .map_err(AnalysisError::ArtifactUnusable)?;

    let kind = analyzer.kind();
    let findings = run_battery(kind, analyzer.checks(), &doc);

    Ok(DomainResult {
        kind,
        score: domain_score(&findings),
        findings,
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
