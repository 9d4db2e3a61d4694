//! URL normalization helpers.
//!
//! Snapshot rows and job fingerprints are keyed by normalized URLs, so
//! every component that compares URLs goes through `format_url` first.

use url::Url;

use crate::error::SnapError;

/// Normalize a URL for storage and comparison.
///
/// Drops the fragment, strips a trailing slash from non-root paths and
/// lowercases the scheme/host (via `Url` parsing). Two requests for the
/// same page always normalize to the same string.
pub fn format_url(raw: &str) -> Result<String, SnapError> {
    let mut url = Url::parse(raw).map_err(|e| SnapError::InvalidUrl(format!("{raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SnapError::InvalidUrl(format!("{raw}: unsupported scheme")));
    }

    url.set_fragment(None);

    let mut formatted = url.to_string();
    // keep "https://example.com/" canonical but trim "/path/" to "/path"
    if formatted.ends_with('/') && url.path() != "/" {
        formatted.pop();
    }

    Ok(formatted)
}

/// Check if a URL is crawlable
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    // Skip data URLs, javascript URLs, and other non-http schemes
    if url.starts_with("data:") || url.starts_with("javascript:") || url.starts_with("mailto:") {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Join a stored relative content path onto the public application URL
///
/// Used when formatting snapshots so screenshot paths become absolute,
/// externally reachable URLs.
pub fn join_app_url(app_url: &str, relative: &str) -> String {
    let base = app_url.trim_end_matches('/');
    let rel = relative.trim_start_matches('/');
    format!("{base}/{rel}")
}

/// Extract the path component of a URL, falling back to the input
///
/// Sitemap pathname filters match against this.
#[must_use]
pub fn url_pathname(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_url_strips_fragment_and_trailing_slash() {
        assert_eq!(
            format_url("https://example.com/a/#top").unwrap(),
            "https://example.com/a"
        );
        assert_eq!(
            format_url("https://example.com/").unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn format_url_rejects_non_http() {
        assert!(format_url("ftp://example.com").is_err());
        assert!(format_url("not a url").is_err());
    }

    #[test]
    fn join_app_url_handles_slashes() {
        assert_eq!(
            join_app_url("https://app.example.com/", "/data/screenshot/ab.webp"),
            "https://app.example.com/data/screenshot/ab.webp"
        );
    }
}
