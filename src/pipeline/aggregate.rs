//! Report aggregation
//!
//! A pure function of the request and its jobs: the same terminal job set
//! always yields the same report, down to the serialized bytes. The
//! timestamp is taken from the jobs, never from the clock.

use crate::analysis::{DomainResult, Finding, Severity};
use crate::config::ScoreWeights;
use crate::pipeline::{Report, Scores, Summary};
use crate::queue::{JobFailure, JobKind, JobRecord, RequestRecord};
use crate::state::{ErrorCode, JobState, RequestStatus};
use std::collections::BTreeMap;

/// What the analysis jobs of a request add up to
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Some analysis job is still queued or running
    Pending,
    /// At least one domain succeeded
    Report(Box<Report>),
    /// Every domain failed; the most specific failure
    Failed(JobFailure),
}

/// Aggregates the analysis jobs of a request
///
/// # Arguments
///
/// * `request` - The request being aggregated
/// * `jobs` - Every job of the request (the fetch job is ignored)
/// * `weights` - Per-domain weights for the overall score
///
/// # Returns
///
/// `Pending` until every analysis job is terminal, then a report or the
/// failure to surface
pub fn aggregate(request: &RequestRecord, jobs: &[JobRecord], weights: &ScoreWeights) -> Aggregation {
    let mut analysis: Vec<&JobRecord> = jobs.iter().filter(|j| j.kind.is_analysis()).collect();

    if analysis.is_empty() {
        return Aggregation::Failed(JobFailure::new(
            ErrorCode::Internal,
            "request has no analysis jobs",
        ));
    }
    if analysis.iter().any(|j| !j.state.is_terminal()) {
        return Aggregation::Pending;
    }

    // Kind order, then enqueue order, so output never depends on row order
    analysis.sort_by_key(|j| (j.kind, j.seq));

    let mut results: BTreeMap<JobKind, DomainResult> = BTreeMap::new();
    let mut failures: BTreeMap<JobKind, JobFailure> = BTreeMap::new();

    for job in &analysis {
        if results.contains_key(&job.kind) || failures.contains_key(&job.kind) {
            continue;
        }
        match domain_outcome(job) {
            Ok(result) => {
                results.insert(job.kind, result);
            }
            Err(failure) => {
                failures.insert(job.kind, failure);
            }
        }
    }

    if results.is_empty() {
        return Aggregation::Failed(surfaced_failure(&failures));
    }

    let generated_at = analysis
        .iter()
        .map(|j| j.updated_at)
        .max()
        .unwrap_or(request.submitted_at);

    let scores = Scores {
        overall: overall_score(&results, weights),
        accessibility: results.get(&JobKind::Accessibility).map(|r| r.score),
        seo: results.get(&JobKind::Seo).map(|r| r.score),
        performance: results.get(&JobKind::Performance).map(|r| r.score),
    };

    let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    let mut total = 0;
    for finding in results.values().flat_map(|r| &r.findings) {
        *by_severity.entry(finding.severity).or_insert(0) += 1;
        total += 1;
    }

    let summary = Summary {
        total_violations: total,
        by_severity,
        domains_analyzed: results.keys().copied().collect(),
        domains_failed: failures.keys().copied().collect(),
    };

    let findings = if request.report_type.includes_findings() {
        Some(
            results
                .iter()
                .map(|(kind, r)| (*kind, r.findings.clone()))
                .collect::<BTreeMap<JobKind, Vec<Finding>>>(),
        )
    } else {
        None
    };

    Aggregation::Report(Box::new(Report {
        request_id: request.id.clone(),
        url: request.normalized_url.clone(),
        report_type: request.report_type,
        status: RequestStatus::Completed,
        scores,
        summary,
        findings,
        failures: failures.iter().map(|(k, f)| (*k, f.code)).collect(),
        generated_at,
    }))
}

/// Weighted mean of the available domain scores, one decimal
///
/// Domains without a score are left out of both numerator and denominator.
/// If every available domain has zero weight the plain mean is used.
pub fn overall_score(results: &BTreeMap<JobKind, DomainResult>, weights: &ScoreWeights) -> f64 {
    if results.is_empty() {
        return 0.0;
    }

    let weighted: Vec<(f64, f64)> = results
        .iter()
        .map(|(kind, r)| (weight_for(weights, *kind), r.score as f64))
        .collect();
    let total_weight: f64 = weighted.iter().map(|(w, _)| w).sum();

    let mean = if total_weight > 0.0 {
        weighted.iter().map(|(w, s)| w * s).sum::<f64>() / total_weight
    } else {
        weighted.iter().map(|(_, s)| s).sum::<f64>() / weighted.len() as f64
    };

    ((mean * 10.0).round() / 10.0).clamp(0.0, 100.0)
}

fn weight_for(weights: &ScoreWeights, kind: JobKind) -> f64 {
    match kind {
        JobKind::Accessibility => weights.accessibility,
        JobKind::Seo => weights.seo,
        JobKind::Performance => weights.performance,
        JobKind::Fetch => 0.0,
    }
}

/// Reads a terminal analysis job
fn domain_outcome(job: &JobRecord) -> Result<DomainResult, JobFailure> {
    match job.state {
        JobState::Done => {
            let value = job.result.clone().ok_or_else(|| {
                JobFailure::new(ErrorCode::AnalysisFailed, "job finished without a result")
            })?;
            serde_json::from_value(value).map_err(|e| {
                JobFailure::new(
                    ErrorCode::AnalysisFailed,
                    format!("unreadable {} result: {}", job.kind, e),
                )
            })
        }
        _ => Err(job.failure().unwrap_or_else(|| {
            JobFailure::new(ErrorCode::Internal, "job is not terminal")
        })),
    }
}

/// Picks the failure a fully failed request reports
///
/// The most specific code wins; ties keep kind order. The message lists
/// every domain.
fn surfaced_failure(failures: &BTreeMap<JobKind, JobFailure>) -> JobFailure {
    let mut code = ErrorCode::Internal;
    let mut best: Option<u8> = None;
    for failure in failures.values() {
        let rank = failure.code.specificity();
        if best.map(|b| rank > b).unwrap_or(true) {
            best = Some(rank);
            code = failure.code;
        }
    }

    let detail: Vec<String> = failures
        .iter()
        .map(|(kind, f)| format!("{}: {} ({})", kind, f.code, f.message))
        .collect();

    JobFailure::new(
        code,
        format!("all analysis jobs failed: {}", detail.join("; ")),
    )
}
