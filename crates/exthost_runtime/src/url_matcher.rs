//! Match patterns of `content_scripts[].matches`.

use url::Url;

use crate::manifest::ContentScript;

const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

/// Whether the page at `location` gets the scripts of `rule`.
pub fn matches_content_script(location: &Url, rule: &ContentScript) -> bool {
    matching_url(
        location,
        &rule.matches,
        &rule.exclude_matches,
        &rule.include_globs,
        &rule.exclude_globs,
        rule.match_about_blank.unwrap_or(false),
    )
}

/// Matches are evaluated first, then `exclude_matches` veto.
pub fn matching_url(
    location: &Url,
    matches: &[String],
    exclude_matches: &[String],
    include_globs: &[String],
    exclude_globs: &[String],
    about_blank: bool,
) -> bool {
    let mut result = matches
        .iter()
        .any(|pattern| matches_pattern(pattern, location, about_blank));
    if exclude_matches
        .iter()
        .any(|pattern| matches_pattern(pattern, location, false))
    {
        result = false;
    }
    if !include_globs.is_empty() {
        log::warn!("include_globs not supported yet.");
    }
    if !exclude_globs.is_empty() {
        log::warn!("exclude_globs not supported yet.");
    }
    result
}

struct Pattern<'a> {
    /// `None` for `*`.
    scheme: Option<&'a str>,
    host: &'a str,
    path: &'a str,
}

impl<'a> Pattern<'a> {
    fn parse(pattern: &'a str) -> Option<Self> {
        let (scheme, rest) = pattern.split_once("://")?;
        let (host, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };
        Some(Self {
            scheme: (scheme != "*").then_some(scheme),
            host,
            path,
        })
    }
}

fn matches_pattern(pattern: &str, location: &Url, about_blank: bool) -> bool {
    if about_blank && location.as_str() == "about:blank" {
        return true;
    }
    let scheme_supported = SUPPORTED_SCHEMES.contains(&location.scheme());
    if pattern == "<all_urls>" {
        return scheme_supported;
    }
    let Some(pattern) = Pattern::parse(pattern) else {
        log::warn!("Invalid match pattern in manifest.json: {pattern}");
        return false;
    };
    if pattern.host.contains(':') {
        // Explicit ports are never matched.
        return false;
    }
    if !scheme_supported {
        return false;
    }
    if matches!(pattern.scheme, Some(scheme) if scheme != location.scheme()) {
        return false;
    }
    host_matches(pattern.host, &location_host(location))
        && path_matches(pattern.path, location.path(), location.query())
}

fn location_host(location: &Url) -> String {
    let host = location.host_str().unwrap_or_default();
    match location.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host.len() > suffix.len()
            && host.ends_with(suffix)
            && host[..host.len() - suffix.len()].ends_with('.');
    }
    pattern == host
}

fn path_matches(pattern: &str, path: &str, query: Option<&str>) -> bool {
    if !pattern.starts_with('/') {
        return false;
    }
    if pattern == "/*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if path.starts_with(prefix) {
            return true;
        }
    }
    if !pattern.contains('*') {
        return pattern == path && query.map_or(true, str::is_empty);
    }
    log::warn!("Not supported path matcher in manifest.json {pattern}");
    true
}

#[cfg(test)]
mod test {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn matches(patterns: &[&str], location: &str) -> bool {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        matching_url(&url(location), &patterns, &[], &[], &[], false)
    }

    #[test]
    fn subdomain_wildcards() {
        let patterns = ["https://*.example.com/*"];

        assert!(matches(&patterns, "https://foo.example.com/path"));
        assert!(!matches(&patterns, "http://foo.example.com/path"));
        assert!(!matches(&patterns, "https://example.com.evil.com/path"));
        assert!(!matches(&patterns, "https://example.com/path"));
        assert!(!matches(&patterns, "https://notexample.com/path"));
    }

    #[test]
    fn all_urls_is_http_only() {
        assert!(matches(&["<all_urls>"], "http://a.test/"));
        assert!(matches(&["*://*/*"], "https://a.test/x"));
        assert!(!matches(&["<all_urls>"], "holoflows-extension://id/page.html"));
        assert!(!matches(&["<all_urls>"], "about:blank"));
    }

    #[test]
    fn about_blank_needs_the_flag() {
        let patterns = vec!["<all_urls>".to_string()];

        assert!(matching_url(&url("about:blank"), &patterns, &[], &[], &[], true));
    }

    #[test]
    fn paths_and_ports() {
        assert!(matches(&["https://a.test/docs/*"], "https://a.test/docs/intro"));
        assert!(matches(&["https://a.test/page"], "https://a.test/page#top"));
        assert!(!matches(&["https://a.test/page"], "https://a.test/page?q=1"));
        assert!(!matches(&["https://a.test:8080/*"], "https://a.test:8080/"));
        assert!(!matches(&["https://a.test/*"], "https://a.test:8080/"));
    }

    #[test]
    fn exclusions_win() {
        let location = url("https://a.test/private/x");
        let matches = vec!["https://a.test/*".to_string()];
        let exclude = vec!["https://a.test/private/*".to_string()];

        assert!(!matching_url(&location, &matches, &exclude, &[], &[], false));
    }
}
