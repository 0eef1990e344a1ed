//! Robots.txt parser implementation
//!
//! Matching is delegated to the robotstxt crate; sitemap discovery is a plain
//! line scan.

use robotstxt::DefaultMatcher;

/// Parsed robots.txt data
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    /// Raw robots.txt content
    content: String,
}

impl ParsedRobots {
    /// Creates a new ParsedRobots from raw robots.txt content
    ///
    /// # Arguments
    ///
    /// * `content` - The raw robots.txt file content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Returns the raw robots.txt content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns true if the file has no directives at all
    pub fn is_empty(&self) -> bool {
        self.content
            .lines()
            .map(str::trim)
            .all(|line| line.is_empty() || line.starts_with('#'))
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - The full URL to check
    /// * `user_agent` - The user agent token (e.g. `*`, `Googlebot`)
    ///
    /// # Returns
    ///
    /// * `true` - If the URL is allowed
    /// * `false` - If the URL is disallowed
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Returns every `Sitemap:` URL declared in the file, in order
    pub fn sitemaps(&self) -> Vec<String> {
        self.content
            .lines()
            .filter_map(|line| {
                let line = line.split('#').next().unwrap_or("").trim();
                let (key, value) = line.split_once(':')?;
                if key.trim().eq_ignore_ascii_case("sitemap") {
                    let value = value.trim();
                    (!value.is_empty()).then(|| value.to_string())
                } else {
                    None
                }
            })
            .collect()
    }
}
