//! Markdown report rendering
//!
//! This module renders a report as a human-readable markdown document: the
//! score table, the severity summary and each domain's findings.

use crate::analysis::{Finding, Severity};
use crate::output::OutputResult;
use crate::pipeline::Report;
use crate::queue::JobKind;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a report as markdown
///
/// # Arguments
///
/// * `report` - The report to render
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the file
/// * `Err(OutputError)` - Failed to write the file
pub fn write_markdown_report(report: &Report, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_report(report);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a report as markdown
pub fn format_markdown_report(report: &Report) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Site Analysis: {}\n\n", report.url));

    md.push_str(&format!("- **Request ID**: {}\n", report.request_id));
    md.push_str(&format!("- **Report Type**: {}\n", report.report_type));
    md.push_str(&format!("- **Status**: {}\n", report.status));
    md.push_str(&format!(
        "- **Generated**: {}\n\n",
        report.generated_at.to_rfc3339()
    ));

    // Scores
    md.push_str("## Scores\n\n");
    md.push_str("| Domain | Score |\n");
    md.push_str("|--------|-------|\n");
    md.push_str(&format!("| **Overall** | {:.1} |\n", report.scores.overall));
    for kind in JobKind::ANALYSIS {
        if let Some(score) = report.scores.domain(kind) {
            md.push_str(&format!("| {} | {} |\n", title(kind), score));
        } else if let Some(code) = report.failures.get(&kind) {
            md.push_str(&format!("| {} | failed ({}) |\n", title(kind), code));
        }
    }
    md.push('\n');

    // Summary
    md.push_str("## Summary\n\n");
    md.push_str(&format!(
        "- **Total Findings**: {}\n",
        report.summary.total_violations
    ));
    for severity in Severity::all() {
        if let Some(count) = report.summary.by_severity.get(&severity) {
            md.push_str(&format!("- **{}**: {}\n", capitalize(severity.as_str()), count));
        }
    }
    md.push('\n');

    let findings = match &report.findings {
        Some(findings) => findings,
        None => return md,
    };

    for (kind, domain_findings) in findings {
        md.push_str(&format!("## {}\n\n", title(*kind)));

        if domain_findings.is_empty() {
            md.push_str("No findings.\n\n");
            continue;
        }

        md.push_str("| Severity | Rule | Description | Location |\n");
        md.push_str("|----------|------|-------------|----------|\n");
        for finding in sorted(domain_findings) {
            md.push_str(&format!(
                "| {} | `{}` | {} | {} |\n",
                finding.severity,
                finding.rule_id,
                escape_cell(&finding.description),
                finding
                    .location
                    .as_deref()
                    .map(|l| format!("`{}`", escape_cell(l)))
                    .unwrap_or_default()
            ));
        }
        md.push('\n');
    }

    md
}

/// Most severe first, stable within a severity
fn sorted(findings: &[Finding]) -> Vec<&Finding> {
    let mut sorted: Vec<&Finding> = findings.iter().collect();
    sorted.sort_by_key(|f| f.severity);
    sorted
}

fn title(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Fetch => "Fetch",
        JobKind::Accessibility => "Accessibility",
        JobKind::Seo => "SEO",
        JobKind::Performance => "Performance",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Keeps a value inside one table cell
fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}
