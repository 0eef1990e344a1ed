use url::Url;

/// Extracts the domain from a URL
///
/// Returns the lowercase host, or None for URLs without one.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use pagescope::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns true if two URLs point at the same site
///
/// A leading `www.` label is ignored so `www.example.com` and `example.com`
/// count as one site. Scheme and port are not compared.
///
/// # Arguments
///
/// * `a` - First URL
/// * `b` - Second URL
pub fn same_site(a: &Url, b: &Url) -> bool {
    match (extract_domain(a), extract_domain(b)) {
        (Some(x), Some(y)) => strip_www(&x) == strip_www(&y),
        _ => false,
    }
}

fn strip_www(domain: &str) -> &str {
    domain.strip_prefix("www.").unwrap_or(domain)
}
