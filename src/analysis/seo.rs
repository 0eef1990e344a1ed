//! SEO checks
//!
//! Indexability and on-page metadata checks. `robots-txt` reads the
//! robots.txt captured next to the page by the fetcher.

use crate::analysis::document::{attr, describe, PageDocument};
use crate::analysis::{Analyzer, Check, Issue, Severity};
use crate::queue::JobKind;
use crate::robots::ParsedRobots;

/// SEO battery
pub struct SeoAnalyzer;

const CHECKS: &[Check] = &[
    Check {
        id: "http-status",
        run: http_status,
    },
    Check {
        id: "https",
        run: https,
    },
    Check {
        id: "title-length",
        run: title_length,
    },
    Check {
        id: "meta-description",
        run: meta_description,
    },
    Check {
        id: "single-h1",
        run: single_h1,
    },
    Check {
        id: "canonical",
        run: canonical,
    },
    Check {
        id: "robots-meta",
        run: robots_meta,
    },
    Check {
        id: "robots-txt",
        run: robots_txt,
    },
    Check {
        id: "viewport",
        run: viewport,
    },
    Check {
        id: "image-alt-seo",
        run: image_alt_seo,
    },
    Check {
        id: "open-graph",
        run: open_graph,
    },
    Check {
        id: "structured-data",
        run: structured_data,
    },
    Check {
        id: "crawlable-links",
        run: crawlable_links,
    },
];

impl Analyzer for SeoAnalyzer {
    fn kind(&self) -> JobKind {
        JobKind::Seo
    }

    fn checks(&self) -> &'static [Check] {
        CHECKS
    }
}

/// Title length search engines display without truncation
const TITLE_RANGE: (usize, usize) = (10, 60);

/// Description length search engines display without truncation
const DESCRIPTION_RANGE: (usize, usize) = (50, 160);

/// User agents whose robots.txt rules decide indexability
const CRAWLER_AGENTS: &[&str] = &["*", "Googlebot"];

fn http_status(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let artifact = doc.artifact;
    let mut issues = Vec::new();

    match artifact.status_code {
        200..=299 => {}
        300..=399 => issues.push(Issue::new(
            Severity::Serious,
            format!("Page answered with redirect status {}", artifact.status_code),
        )),
        status => issues.push(Issue::new(
            Severity::Critical,
            format!("Page answered with HTTP {}", status),
        )),
    }

    if trim_slash(&artifact.final_url) != trim_slash(&artifact.requested_url) {
        issues.push(
            Issue::new(
                Severity::Info,
                format!("Requested URL redirects to {}", artifact.final_url),
            )
            .at(artifact.requested_url.clone()),
        );
    }

    Ok(issues)
}

fn https(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    match &doc.url {
        Some(url) if url.scheme() == "http" => Ok(vec![Issue::new(
            Severity::Serious,
            "Page is not served over HTTPS",
        )
        .at(url.to_string())]),
        _ => Ok(Vec::new()),
    }
}

fn title_length(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let title = match doc.title() {
        Some(title) => title,
        None => {
            return Ok(vec![Issue::new(
                Severity::Serious,
                "Page has no <title>",
            )])
        }
    };

    let len = title.chars().count();
    let (min, max) = TITLE_RANGE;
    if len < min {
        Ok(vec![Issue::new(
            Severity::Minor,
            format!("Title is {} characters, shorter than {}", len, min),
        )
        .at("title")])
    } else if len > max {
        Ok(vec![Issue::new(
            Severity::Minor,
            format!("Title is {} characters, longer than {}", len, max),
        )
        .at("title")])
    } else {
        Ok(Vec::new())
    }
}

fn meta_description(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let description = match doc.meta_named("description").filter(|d| !d.is_empty()) {
        Some(description) => description,
        None => {
            return Ok(vec![Issue::new(
                Severity::Moderate,
                "Page has no meta description",
            )])
        }
    };

    let len = description.chars().count();
    let (min, max) = DESCRIPTION_RANGE;
    if len < min || len > max {
        Ok(vec![Issue::new(
            Severity::Minor,
            format!(
                "Meta description is {} characters, outside {}-{}",
                len, min, max
            ),
        )
        .at("meta[name=\"description\"]")])
    } else {
        Ok(Vec::new())
    }
}

fn single_h1(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let count = doc.select("h1")?.len();
    match count {
        0 => Ok(vec![Issue::new(Severity::Moderate, "Page has no <h1>")]),
        1 => Ok(Vec::new()),
        n => Ok(vec![Issue::new(
            Severity::Minor,
            format!("Page has {} <h1> elements", n),
        )]),
    }
}

fn canonical(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let links: Vec<_> = doc
        .select("link[rel][href]")?
        .into_iter()
        .filter(|link| {
            link.value()
                .attr("rel")
                .map(|rel| {
                    rel.split_whitespace()
                        .any(|r| r.eq_ignore_ascii_case("canonical"))
                })
                .unwrap_or(false)
        })
        .collect();

    match links.as_slice() {
        [] => Ok(vec![Issue::new(
            Severity::Minor,
            "Page does not declare a canonical URL",
        )]),
        [link] => {
            let href = attr(link, "href").unwrap_or("");
            match doc.resolve(href) {
                None => Ok(vec![Issue::new(
                    Severity::Moderate,
                    format!("Canonical URL {:?} is not a valid http(s) URL", href),
                )
                .at(describe(link))]),
                Some(target) => {
                    let own = doc.url.as_ref().map(|u| trim_slash(u.as_str()).to_string());
                    if own.as_deref() != Some(trim_slash(target.as_str())) {
                        Ok(vec![Issue::new(
                            Severity::Info,
                            format!("Canonical URL points to {}", target),
                        )
                        .at(describe(link))])
                    } else {
                        Ok(Vec::new())
                    }
                }
            }
        }
        many => Ok(vec![Issue::new(
            Severity::Moderate,
            format!("Page declares {} canonical URLs", many.len()),
        )]),
    }
}

fn robots_meta(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut directives: Vec<(String, &'static str)> = Vec::new();
    if let Some(meta) = doc.meta_named("robots") {
        directives.push((meta.to_ascii_lowercase(), "meta[name=\"robots\"]"));
    }
    if let Some(header) = doc.artifact.header("x-robots-tag") {
        directives.push((header.to_ascii_lowercase(), "X-Robots-Tag header"));
    }

    let mut issues = Vec::new();
    for (value, location) in directives {
        let tokens: Vec<&str> = value.split(',').map(str::trim).collect();
        if tokens.iter().any(|t| *t == "noindex" || *t == "none") {
            issues.push(
                Issue::new(Severity::Critical, "Page asks search engines not to index it")
                    .at(location),
            );
        } else if tokens.contains(&"nofollow") {
            issues.push(
                Issue::new(
                    Severity::Moderate,
                    "Page asks search engines not to follow its links",
                )
                .at(location),
            );
        }
    }

    Ok(issues)
}

fn robots_txt(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let content = match &doc.artifact.robots_txt {
        Some(content) => content,
        None => {
            return Ok(vec![Issue::new(
                Severity::Minor,
                "Site has no robots.txt",
            )
            .at("/robots.txt")])
        }
    };

    let robots = ParsedRobots::from_content(content);
    let mut issues = Vec::new();

    if !robots.is_empty() {
        let page = doc.artifact.final_url.as_str();
        let blocked: Vec<&str> = CRAWLER_AGENTS
            .iter()
            .copied()
            .filter(|agent| !robots.is_allowed(page, agent))
            .collect();
        if !blocked.is_empty() {
            issues.push(
                Issue::new(
                    Severity::Critical,
                    format!("robots.txt blocks this page for {}", blocked.join(", ")),
                )
                .at("/robots.txt"),
            );
        }
    }

    if robots.sitemaps().is_empty() {
        issues.push(Issue::new(Severity::Info, "robots.txt does not list a sitemap").at("/robots.txt"));
    }

    Ok(issues)
}

fn viewport(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    match doc.meta_named("viewport") {
        Some(content) if content.to_ascii_lowercase().contains("width=") => Ok(Vec::new()),
        Some(_) => Ok(vec![Issue::new(
            Severity::Minor,
            "Viewport meta tag does not set a width",
        )
        .at("meta[name=\"viewport\"]")]),
        None => Ok(vec![Issue::new(
            Severity::Moderate,
            "Page has no viewport meta tag and will not render well on mobile",
        )]),
    }
}

fn image_alt_seo(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let images = doc.select("img")?;
    let missing = images.iter().filter(|img| attr(img, "alt").is_none()).count();

    if missing == 0 {
        return Ok(Vec::new());
    }

    Ok(vec![Issue::new(
        Severity::Minor,
        format!(
            "{} of {} images have no descriptive alt text for image search",
            missing,
            images.len()
        ),
    )])
}

fn open_graph(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let missing: Vec<&str> = ["og:title", "og:description", "og:image"]
        .into_iter()
        .filter(|property| {
            doc.meta_property(property)
                .map(|v| v.is_empty())
                .unwrap_or(true)
        })
        .collect();

    if missing.is_empty() {
        Ok(Vec::new())
    } else {
        Ok(vec![Issue::new(
            Severity::Minor,
            format!("Missing Open Graph tags: {}", missing.join(", ")),
        )])
    }
}

fn structured_data(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let scripts = doc.select("script[type]")?;
    let json_ld: Vec<_> = scripts
        .into_iter()
        .filter(|s| {
            s.value()
                .attr("type")
                .map(|t| t.trim().eq_ignore_ascii_case("application/ld+json"))
                .unwrap_or(false)
        })
        .collect();
    let microdata = !doc.select("[itemscope]")?.is_empty();

    if json_ld.is_empty() && !microdata {
        return Ok(vec![Issue::new(
            Severity::Info,
            "Page has no structured data",
        )]);
    }

    let mut issues = Vec::new();
    for (index, script) in json_ld.iter().enumerate() {
        let body: String = script.text().collect();
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&body) {
            issues.push(
                Issue::new(
                    Severity::Moderate,
                    format!("JSON-LD block is not valid JSON: {}", e),
                )
                .at(format!("script[type=\"application/ld+json\"]:nth-of-type({})", index + 1)),
            );
        }
    }

    Ok(issues)
}

fn crawlable_links(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let anchors = doc.select("a")?;
    let mut crawlable = 0;
    let mut uncrawlable = 0;

    for anchor in &anchors {
        match anchor.value().attr("href") {
            Some(href) if doc.resolve(href).is_some() => crawlable += 1,
            Some(href) if href.trim_start().to_ascii_lowercase().starts_with("javascript:") => {
                uncrawlable += 1
            }
            // Anchors, mailto: and friends are fine, just not crawlable
            Some(_) => {}
            None if anchor.value().attr("onclick").is_some() => uncrawlable += 1,
            None => {}
        }
    }

    let mut issues = Vec::new();
    if uncrawlable > 0 {
        issues.push(Issue::new(
            Severity::Minor,
            format!(
                "{} link(s) navigate with script and cannot be followed by crawlers",
                uncrawlable
            ),
        ));
    }
    if crawlable == 0 {
        issues.push(Issue::new(
            Severity::Moderate,
            "Page has no crawlable links",
        ));
    }

    Ok(issues)
}

fn trim_slash(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}
