//! Accessibility checks
//!
//! Static checks over the rendered DOM, modeled on the most common WCAG
//! failures. Rule ids follow axe-core naming where one exists.

use crate::analysis::document::{attr, describe, element_text, PageDocument};
use crate::analysis::{Analyzer, Check, Issue, Severity};
use crate::queue::JobKind;
use scraper::ElementRef;
use std::collections::{BTreeMap, HashSet};

/// Accessibility battery
pub struct AccessibilityAnalyzer;

const CHECKS: &[Check] = &[
    Check {
        id: "html-has-lang",
        run: html_has_lang,
    },
    Check {
        id: "document-title",
        run: document_title,
    },
    Check {
        id: "image-alt",
        run: image_alt,
    },
    Check {
        id: "input-label",
        run: input_label,
    },
    Check {
        id: "button-name",
        run: button_name,
    },
    Check {
        id: "link-name",
        run: link_name,
    },
    Check {
        id: "heading-order",
        run: heading_order,
    },
    Check {
        id: "duplicate-id",
        run: duplicate_id,
    },
    Check {
        id: "landmark-main",
        run: landmark_main,
    },
    Check {
        id: "meta-viewport-zoom",
        run: meta_viewport_zoom,
    },
    Check {
        id: "frame-title",
        run: frame_title,
    },
];

impl Analyzer for AccessibilityAnalyzer {
    fn kind(&self) -> JobKind {
        JobKind::Accessibility
    }

    fn checks(&self) -> &'static [Check] {
        CHECKS
    }

    fn validate(&self, doc: &PageDocument<'_>) -> Result<(), String> {
        if doc.body_is_empty() {
            return Err("document body has no rendered content".to_string());
        }
        Ok(())
    }
}

/// Input types that never need a visible label
const UNLABELLED_INPUT_TYPES: &[&str] = &["hidden", "submit", "button", "reset", "image"];

fn html_has_lang(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let html = doc.first("html")?;
    match html.as_ref().and_then(|el| attr(el, "lang")) {
        Some(_) => Ok(Vec::new()),
        None => Ok(vec![Issue::new(
            Severity::Serious,
            "<html> element does not have a lang attribute",
        )
        .at("html")]),
    }
}

fn document_title(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    match doc.title() {
        Some(_) => Ok(Vec::new()),
        None => Ok(vec![Issue::new(
            Severity::Serious,
            "Document does not have a non-empty <title>",
        )]),
    }
}

fn image_alt(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut issues = Vec::new();

    for img in doc.select("img")? {
        let el = img.value();
        // An empty alt marks the image decorative
        if el.attr("alt").is_some() || has_accessible_name(&img) || is_presentational(&img) {
            continue;
        }
        issues.push(
            Issue::new(Severity::Critical, "Image has no alt text").at(describe(&img)),
        );
    }

    Ok(issues)
}

fn input_label(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let labelled_ids: HashSet<String> = doc
        .select("label[for]")?
        .iter()
        .filter_map(|label| attr(label, "for"))
        .map(str::to_string)
        .collect();

    let mut issues = Vec::new();
    for field in doc.select("input, select, textarea")? {
        let el = field.value();

        if el.name() == "input" {
            let input_type = el.attr("type").unwrap_or("text").trim().to_ascii_lowercase();
            if UNLABELLED_INPUT_TYPES.contains(&input_type.as_str()) {
                continue;
            }
        }

        let labelled_by_for = el.id().map(|id| labelled_ids.contains(id)).unwrap_or(false);
        if labelled_by_for || has_accessible_name(&field) || inside_label(&field) {
            continue;
        }

        issues.push(
            Issue::new(Severity::Critical, "Form field does not have a label").at(describe(&field)),
        );
    }

    Ok(issues)
}

fn button_name(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut issues = Vec::new();

    for button in doc.select("button, [role=button]")? {
        if has_accessible_name(&button) || !element_text(&button).is_empty() || has_img_alt(&button)? {
            continue;
        }
        issues.push(
            Issue::new(Severity::Critical, "Button does not have discernible text")
                .at(describe(&button)),
        );
    }

    for input in doc.select("input[type]")? {
        let input_type = input.value().attr("type").unwrap_or("").trim().to_ascii_lowercase();
        let named = match input_type.as_str() {
            "submit" | "reset" => true, // browsers supply a default label
            "button" => attr(&input, "value").is_some() || has_accessible_name(&input),
            "image" => attr(&input, "alt").is_some() || has_accessible_name(&input),
            _ => continue,
        };
        if !named {
            issues.push(
                Issue::new(Severity::Critical, "Button does not have discernible text")
                    .at(describe(&input)),
            );
        }
    }

    Ok(issues)
}

fn link_name(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut issues = Vec::new();

    for link in doc.select("a[href]")? {
        if has_accessible_name(&link) || !element_text(&link).is_empty() || has_img_alt(&link)? {
            continue;
        }
        issues.push(
            Issue::new(Severity::Serious, "Link does not have discernible text").at(describe(&link)),
        );
    }

    Ok(issues)
}

fn heading_order(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut issues = Vec::new();
    let mut previous: Option<u32> = None;

    for heading in doc.select("h1, h2, h3, h4, h5, h6")? {
        let level = heading_level(&heading);

        if let Some(prev) = previous {
            if level > prev + 1 {
                issues.push(
                    Issue::new(
                        Severity::Moderate,
                        format!("Heading level jumps from h{} to h{}", prev, level),
                    )
                    .at(describe(&heading)),
                );
            }
        }
        previous = Some(level);
    }

    Ok(issues)
}

fn duplicate_id(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let elements = doc.select("[id]")?;
    for el in &elements {
        if let Some(id) = attr(el, "id") {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    // Report in document order of first occurrence
    let mut reported = HashSet::new();
    let mut issues = Vec::new();
    for el in &elements {
        let id = match attr(el, "id") {
            Some(id) => id,
            None => continue,
        };
        let count = counts.get(id).copied().unwrap_or(0);
        if count > 1 && reported.insert(id) {
            issues.push(
                Issue::new(
                    Severity::Minor,
                    format!("id \"{}\" is used by {} elements", id, count),
                )
                .at(format!("#{}", id)),
            );
        }
    }

    Ok(issues)
}

fn landmark_main(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mains = doc.select("main, [role=main]")?;
    match mains.len() {
        0 => Ok(vec![Issue::new(
            Severity::Moderate,
            "Document does not have a main landmark",
        )]),
        1 => Ok(Vec::new()),
        n => Ok(vec![Issue::new(
            Severity::Moderate,
            format!("Document has {} main landmarks", n),
        )]),
    }
}

fn meta_viewport_zoom(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let content = match doc.meta_named("viewport") {
        Some(content) => content.to_ascii_lowercase(),
        None => return Ok(Vec::new()),
    };

    let mut issues = Vec::new();
    for (key, value) in viewport_directives(&content) {
        match key.as_str() {
            "user-scalable" if value == "no" || value == "0" => {
                issues.push(
                    Issue::new(Severity::Critical, "Viewport disables user zooming")
                        .at("meta[name=\"viewport\"]"),
                );
            }
            "maximum-scale" => {
                if let Ok(scale) = value.parse::<f64>() {
                    if scale < 2.0 {
                        issues.push(
                            Issue::new(
                                Severity::Critical,
                                format!("Viewport limits zoom to {}x", value),
                            )
                            .at("meta[name=\"viewport\"]"),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    Ok(issues)
}

fn frame_title(doc: &PageDocument<'_>) -> Result<Vec<Issue>, String> {
    let mut issues = Vec::new();

    for frame in doc.select("iframe, frame")? {
        if attr(&frame, "title").is_some() || has_accessible_name(&frame) || is_presentational(&frame)
        {
            continue;
        }
        issues.push(Issue::new(Severity::Serious, "Frame does not have a title").at(describe(&frame)));
    }

    Ok(issues)
}

/// Splits a viewport `content` value into `(key, value)` pairs
pub(crate) fn viewport_directives(content: &str) -> Vec<(String, String)> {
    content
        .split([',', ';'])
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn has_accessible_name(element: &ElementRef<'_>) -> bool {
    attr(element, "aria-label").is_some()
        || attr(element, "aria-labelledby").is_some()
        || attr(element, "title").is_some()
}

fn is_presentational(element: &ElementRef<'_>) -> bool {
    matches!(attr(element, "role"), Some("presentation") | Some("none"))
        || attr(element, "aria-hidden") == Some("true")
}

fn inside_label(element: &ElementRef<'_>) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|el| el.name() == "label")
            .unwrap_or(false)
    })
}

fn has_img_alt(element: &ElementRef<'_>) -> Result<bool, String> {
    let selector = scraper::Selector::parse("img[alt], svg[aria-label]")
        .map_err(|e| format!("invalid selector: {:?}", e))?;
    Ok(element.select(&selector).any(|img| {
        attr(&img, "alt").is_some() || attr(&img, "aria-label").is_some()
    }))
}

fn heading_level(heading: &ElementRef<'_>) -> u32 {
    heading
        .value()
        .name()
        .trim_start_matches('h')
        .parse()
        .unwrap_or(1)
}
