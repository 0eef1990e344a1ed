use crate::UrlError;
use std::fmt;
use url::{Host, Url};

/// Scheme used when the caller supplies a bare host
const DEFAULT_SCHEME: &str = "https";

/// A site URL in its single canonical absolute form
///
/// Keeps the exact text produced by normalization (no trailing slash is
/// added to a bare host) alongside the parsed `Url` used for fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    text: String,
    parsed: Url,
}

impl NormalizedUrl {
    /// Returns the canonical string form
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the parsed URL
    pub fn url(&self) -> &Url {
        &self.parsed
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Normalizes a user-supplied site identifier into an absolute URL
///
/// # Normalization Steps
///
/// 1. Trim surrounding whitespace; reject empty input
/// 2. Keep an explicit `http`/`https` scheme (lowercased); reject any other
///    scheme; prefix `https://` when no scheme is present
/// 3. Lowercase the authority (host and port)
/// 4. Leave path, query and fragment untouched
/// 5. Require a resolvable-looking host: a dotted domain, `localhost`, or an
///    IP literal; reject embedded credentials
///
/// Normalization is idempotent.
///
/// # Arguments
///
/// * `input` - The raw site identifier (e.g. `example.com`, `www.example.com`,
///   `http://example.com/page`)
///
/// # Returns
///
/// * `Ok(NormalizedUrl)` - Canonical URL
/// * `Err(UrlError)` - Input cannot name a fetchable site
///
/// # Examples
///
/// ```
/// use pagescope::url::normalize_site_url;
///
/// let url = normalize_site_url("  Example.COM ").unwrap();
/// assert_eq!(url.as_str(), "https://example.com");
///
/// let url = normalize_site_url("http://www.example.com/about?x=1").unwrap();
/// assert_eq!(url.as_str(), "http://www.example.com/about?x=1");
/// ```
pub fn normalize_site_url(input: &str) -> Result<NormalizedUrl, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let (scheme, rest) = match trimmed.find("://") {
        Some(idx) => {
            let scheme = trimmed[..idx].to_ascii_lowercase();
            if scheme != "http" && scheme != "https" {
                return Err(UrlError::InvalidScheme(format!(
                    "Only HTTP and HTTPS schemes are supported, got: {}",
                    scheme
                )));
            }
            (scheme, &trimmed[idx + 3..])
        }
        None => (DEFAULT_SCHEME.to_string(), trimmed),
    };

    // The authority ends at the first path, query or fragment delimiter
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    if authority.is_empty() {
        return Err(UrlError::Malformed(format!("No host in '{}'", trimmed)));
    }
    if authority.contains('@') {
        return Err(UrlError::Malformed(format!(
            "Credentials are not allowed in '{}'",
            trimmed
        )));
    }

    let text = format!("{}://{}{}", scheme, authority.to_ascii_lowercase(), tail);
    let parsed = Url::parse(&text).map_err(|e| UrlError::Parse(format!("{}: {}", trimmed, e)))?;

    match parsed.host() {
        Some(Host::Domain(domain)) => {
            if !is_resolvable_domain(domain) {
                return Err(UrlError::UnresolvableHost(domain.to_string()));
            }
        }
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {}
        None => return Err(UrlError::Malformed(format!("No host in '{}'", trimmed))),
    }

    Ok(NormalizedUrl { text, parsed })
}

/// Returns true if a domain name looks like something DNS could resolve
fn is_resolvable_domain(domain: &str) -> bool {
    if domain == "localhost" {
        return true;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_alphanumeric() || c == '-')
        })
}
