//! Performance checks
//!
//! Lab-style checks over navigation timings captured by the fetcher and the
//! shape of the delivered document. Thresholds follow Lighthouse defaults.

use crate::analysis::document::{attr, describe, PageDocument};
use crate::analysis::{Analyzer, Check, Issue, Severity};
use crate::queue::JobKind;

/// Performance battery
pub struct PerformanceAnalyzer;

const CHECKS: &[Check] = &[
    Check {
        id: "navigation-time",
        run: navigation_time,
    },
    Check {
        id: "time-to-first-byte",
        run: time_to_first_byte,
    },
    Check {
        id: "page-weight",
        run: page_weight,
    },
    Check {
        id: "resource-count",
        run: resource_count,
    },
    Check {
        id: "render-blocking-scripts",
        run: render_blocking_scripts,
    },
    Check {
        id: "image-dimensions",
        run: image_dimensions,
    },
    Check {
        id: "dom-size",
        run: dom_size,
    },
    Check {
        id: "cache-policy",
        run: cache_policy,
    },
    Check {
        id: "inline-asset-size",
        run: inline_asset_size,
    },
];

impl Analyzer for PerformanceAnalyzer {
    fn kind(&self) -> JobKind {
        JobKind::Performance
    }

    fn checks(&self) -> &'static [Check] {
        CHECKS
    }
}

/// `(moderate, serious)` thresholds
const NAVIGATION_MS: (u64, u64) = (2_500, 4_000);
const TTFB_MS: (u64, u64) = (800, 1_800);
const DOCUMENT_BYTES: (u64, u64) = (256 * 1024, 1024 * 1024);
const RESOURCES: (usize, usize) = (50, 100);
const DOM_ELEMENTS: (usize, usize) = (800, 1_400);
const INLINE_BYTES: (usize, usize) = (50 * 1024, 150 * 1024);

/// Grades `value` against `(moderate, serious)` thresholds
fn grade<T: PartialOrd>(value: T, thresholds: (T, T)) -> Option<Severity> {
    if value > thresholds.1 {
        Some(Severity::Serious)
    } else if value > thresholds.0 {
        Some(Severity::Moderate)
    } else {
        None
    }
}

fn navigation_time(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let ms = doc.artifact.timing.navigation_ms;
    Ok(grade(ms, NAVIGATION_MS)
        .map(|severity| {
            Issue::new(
                severity,
                format!("Page took {}ms to load (target {}ms)", ms, NAVIGATION_MS.0),
            )
        })
        .into_iter()
        .collect())
}

fn time_to_first_byte(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let ms = doc.artifact.timing.ttfb_ms;
    Ok(grade(ms, TTFB_MS)
        .map(|severity| {
            Issue::new(
                severity,
                format!("Server responded after {}ms (target {}ms)", ms, TTFB_MS.0),
            )
        })
        .into_iter()
        .collect())
}

fn page_weight(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let bytes = doc.artifact.timing.content_length;
    Ok(grade(bytes, DOCUMENT_BYTES)
        .map(|severity| {
            Issue::new(
                severity,
                format!("HTML document is {} KiB", bytes / 1024),
            )
        })
        .into_iter()
        .collect())
}

fn resource_count(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let count = doc
        .select("script[src], link[rel=stylesheet][href], img[src], iframe[src], video[src], audio[src], source[src]")?
        .len();
    Ok(grade(count, RESOURCES)
        .map(|severity| {
            Issue::new(
                severity,
                format!("Page references {} subresources", count),
            )
        })
        .into_iter()
        .collect())
}

fn render_blocking_scripts(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut issues = Vec::new();

    for script in doc.select("head script[src]")? {
        let el = script.value();
        let is_module = el
            .attr("type")
            .map(|t| t.trim().eq_ignore_ascii_case("module"))
            .unwrap_or(false);
        if el.attr("async").is_some() || el.attr("defer").is_some() || is_module {
            continue;
        }
        issues.push(
            Issue::new(
                Severity::Moderate,
                "Script in <head> blocks rendering; add async or defer",
            )
            .at(describe(&script)),
        );
    }

    Ok(issues)
}

fn image_dimensions(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut issues = Vec::new();

    for img in doc.select("img")? {
        if attr(&img, "width").is_some() && attr(&img, "height").is_some() {
            continue;
        }
        issues.push(
            Issue::new(
                Severity::Minor,
                "Image has no explicit width and height, which causes layout shift",
            )
            .at(describe(&img)),
        );
    }

    Ok(issues)
}

fn dom_size(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let elements = doc.select("*")?.len();
    Ok(grade(elements, DOM_ELEMENTS)
        .map(|severity| {
            Issue::new(
                severity,
                format!("DOM has {} elements (target {})", elements, DOM_ELEMENTS.0),
            )
        })
        .into_iter()
        .collect())
}

fn cache_policy(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let artifact = doc.artifact;

    if let Some(cache_control) = artifact.header("cache-control") {
        let lower = cache_control.to_ascii_lowercase();
        if lower.contains("no-store") {
            return Ok(vec![Issue::new(
                Severity::Info,
                "Document is served with Cache-Control: no-store",
            )
            .at("Cache-Control header")]);
        }
        return Ok(Vec::new());
    }

    if artifact.header("etag").is_some()
        || artifact.header("last-modified").is_some()
        || artifact.header("expires").is_some()
    {
        return Ok(Vec::new());
    }

    Ok(vec![Issue::new(
        Severity::Minor,
        "Document has no caching headers",
    )])
}

fn inline_asset_size(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut bytes = 0;
    for element in doc.select("script:not([src]), style")? {
        let el = element.value();
        let is_data = el
            .attr("type")
            .map(|t| t.trim().eq_ignore_ascii_case("application/ld+json"))
            .unwrap_or(false);
        if is_data {
            continue;
        }
        bytes += element.text().map(str::len).sum::<usize>();
    }

    Ok(grade(bytes, INLINE_BYTES)
        .map(|severity| {
            Issue::new(
                severity,
                format!("Inline scripts and styles total {} KiB", bytes / 1024),
            )
        })
        .into_iter()
        .collect())
}
