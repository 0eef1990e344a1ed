use crate::fetcher::RenderedPage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timings captured during one navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTiming {
    /// Request start until the body was fully read (milliseconds)
    pub navigation_ms: u64,
    /// Request start until response headers arrived (milliseconds)
    pub ttfb_ms: u64,
    /// Decoded body size in bytes
    pub content_length: u64,
}

/// The rendered page shared by every analysis job of a request
///
/// Published once per request and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchArtifact {
    pub request_id: String,
    pub requested_url: String,
    pub final_url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub dom_snapshot: String,
    /// Stored beside the JSON body, not inside it
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
    pub headers: BTreeMap<String, String>,
    pub robots_txt: Option<String>,
    pub timing: FetchTiming,
    pub fetched_at: DateTime<Utc>,
}

impl FetchArtifact {
    /// Assembles an artifact from a rendered page
    pub fn from_rendered(
        request_id: &str,
        requested_url: &str,
        page: RenderedPage,
        robots_txt: Option<String>,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            requested_url: requested_url.to_string(),
            final_url: page.final_url,
            status_code: page.status_code,
            content_type: page.content_type,
            dom_snapshot: page.body,
            screenshot: page.screenshot,
            headers: page.headers,
            robots_txt,
            timing: page.timing,
            fetched_at: Utc::now(),
        }
    }

    /// Looks up a response header by name, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns why the snapshot cannot be analyzed, if it cannot
    pub fn unusable_reason(&self) -> Option<String> {
        if self.dom_snapshot.trim().is_empty() {
            return Some("empty DOM snapshot".to_string());
        }

        match &self.content_type {
            Some(ct) if !is_html_content_type(ct) => {
                Some(format!("snapshot is not HTML (content-type: {})", ct))
            }
            _ => None,
        }
    }

    /// Builds a small artifact for unit tests
    #[cfg(test)]
    pub(crate) fn sample(request_id: &str, html: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        Self {
            request_id: request_id.to_string(),
            requested_url: "https://example.com".to_string(),
            final_url: "https://example.com/".to_string(),
            status_code: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            dom_snapshot: html.to_string(),
            screenshot: None,
            headers,
            robots_txt: None,
            timing: FetchTiming {
                navigation_ms: 120,
                ttfb_ms: 40,
                content_length: html.len() as u64,
            },
            fetched_at: Utc::now(),
        }
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}
