//! Parsed view of a fetch artifact
//!
//! Wraps the `scraper` DOM together with the artifact it came from and offers
//! the small set of queries the check batteries share.

use crate::fetcher::FetchArtifact;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// A parsed page plus the artifact metadata checks need
///
/// Not `Send`: build and use it on one thread.
pub struct PageDocument<'a> {
    pub html: Html,
    pub artifact: &'a FetchArtifact,
    /// Final URL after redirects, if it parses
    pub url: Option<Url>,
}

impl<'a> PageDocument<'a> {
    /// Parses the artifact's DOM snapshot
    pub fn parse(artifact: &'a FetchArtifact) -> Self {
        Self {
            html: Html::parse_document(&artifact.dom_snapshot),
            artifact,
            url: Url::parse(&artifact.final_url).ok(),
        }
    }

    /// Selects every element matching a CSS selector
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<ElementRef>)` - Matches in document order
    /// * `Err(String)` - The selector does not parse
    pub fn select(&self, selector: &str) -> Result<Vec<ElementRef<'_>>, String> {
        let parsed = Selector::parse(selector)
            .map_err(|e| format!("invalid selector {:?}: {:?}", selector, e))?;
        Ok(self.html.select(&parsed).collect())
    }

    /// Returns the first element matching a CSS selector
    pub fn first(&self, selector: &str) -> Result<Option<ElementRef<'_>>, String> {
        Ok(self.select(selector)?.into_iter().next())
    }

    /// Extracts the page title from the `<title>` tag
    pub fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;

        self.html
            .select(&selector)
            .next()
            .map(|element| element_text(&element))
            .filter(|s| !s.is_empty())
    }

    /// Returns the `content` of `<meta name=...>`, matching the name
    /// case-insensitively
    pub fn meta_named(&self, name: &str) -> Option<String> {
        let selector = Selector::parse("meta[name][content]").ok()?;

        self.html
            .select(&selector)
            .find(|el| {
                el.value()
                    .attr("name")
                    .map(|n| n.trim().eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
            .and_then(|el| el.value().attr("content"))
            .map(|c| c.trim().to_string())
    }

    /// Returns the `content` of `<meta property=...>` (Open Graph style)
    pub fn meta_property(&self, property: &str) -> Option<String> {
        let selector = Selector::parse("meta[property][content]").ok()?;

        self.html
            .select(&selector)
            .find(|el| {
                el.value()
                    .attr("property")
                    .map(|p| p.trim().eq_ignore_ascii_case(property))
                    .unwrap_or(false)
            })
            .and_then(|el| el.value().attr("content"))
            .map(|c| c.trim().to_string())
    }

    /// Returns true if `<body>` has neither child elements nor text
    pub fn body_is_empty(&self) -> bool {
        let selector = match Selector::parse("body") {
            Ok(selector) => selector,
            Err(_) => return true,
        };

        match self.html.select(&selector).next() {
            None => true,
            Some(body) => {
                let has_elements = body.children().any(|child| child.value().is_element());
                let has_text = body.text().any(|t| !t.trim().is_empty());
                !has_elements && !has_text
            }
        }
    }

    /// Resolves an `href`/`src` against the page URL
    ///
    /// Returns None for empty values, fragment-only links, non-navigational
    /// schemes and anything that does not resolve to http(s).
    pub fn resolve(&self, href: &str) -> Option<Url> {
        let href = href.trim();

        if href.is_empty() || href.starts_with('#') {
            return None;
        }

        let lower = href.to_ascii_lowercase();
        if lower.starts_with("javascript:")
            || lower.starts_with("mailto:")
            || lower.starts_with("tel:")
            || lower.starts_with("data:")
        {
            return None;
        }

        let resolved = match &self.url {
            Some(base) => base.join(href).ok()?,
            None => Url::parse(href).ok()?,
        };

        if resolved.scheme() == "http" || resolved.scheme() == "https" {
            Some(resolved)
        } else {
            None
        }
    }
}

/// Collects an element's text with whitespace collapsed
pub fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns a non-empty, trimmed attribute value
pub fn attr<'e>(element: &ElementRef<'e>, name: &str) -> Option<&'e str> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Short CSS-like description of an element for finding locations
///
/// `tag#id` when the element has an id, otherwise `tag[attr="value"]` using
/// the first identifying attribute present, otherwise just the tag name.
pub fn describe(element: &ElementRef<'_>) -> String {
    let el = element.value();
    let tag = el.name();

    if let Some(id) = el.id() {
        return format!("{}#{}", tag, id);
    }

    for name in ["name", "src", "href", "type"] {
        if let Some(value) = el.attr(name) {
            let value: String = value.chars().take(80).collect();
            return format!("{}[{}=\"{}\"]", tag, name, value);
        }
    }

    tag.to_string()
}
