//! Core types for the crawl job queue.
//!
//! This module contains the queue identifiers, the serialized job
//! payload, payload fingerprinting for deduplication, and the tagged
//! outcome type returned by queue handlers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Named job lanes, each dispatched with its own concurrency limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueueName {
    /// Asynchronous render requests from the public API
    #[serde(rename = "urlCrawler")]
    UrlCrawler,
    /// Render requests whose caller is waiting synchronously
    #[serde(rename = "syncCrawler")]
    SyncCrawler,
    /// Sitemap-driven re-crawl jobs from the cron scheduler
    #[serde(rename = "cronJobs")]
    CronJobs,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [Self::UrlCrawler, Self::SyncCrawler, Self::CronJobs];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UrlCrawler => "urlCrawler",
            Self::SyncCrawler => "syncCrawler",
            Self::CronJobs => "cronJobs",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "urlCrawler" => Some(Self::UrlCrawler),
            "syncCrawler" => Some(Self::SyncCrawler),
            "cronJobs" => Some(Self::CronJobs),
            _ => None,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screenshot output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    #[default]
    Webp,
}

impl ImageFormat {
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }
}

/// A cookie injected into the page before navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// ISO-8601 expiry; unset cookies are session cookies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

/// A localStorage entry seeded before any page script runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStorageItem {
    pub key: String,
    pub value: String,
}

fn default_true() -> bool {
    true
}

fn default_width() -> u32 {
    crate::utils::DEFAULT_VIEWPORT_WIDTH
}

fn default_height() -> u32 {
    crate::utils::DEFAULT_VIEWPORT_HEIGHT
}

fn default_quality() -> u8 {
    crate::utils::SCREENSHOT_QUALITY
}

fn default_timeout_ms() -> u64 {
    crate::utils::DEFAULT_RENDER_TIMEOUT_MS
}

/// The full render request carried by a job row.
///
/// Serialized as JSON into the `payload` column; the field names are the
/// external camelCase wire names so persisted rows survive upgrades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlPayload {
    pub url: String,
    #[serde(default = "default_true")]
    pub include_html: bool,
    #[serde(default = "default_true")]
    pub include_screenshot: bool,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub wait_time_ms: u64,
    #[serde(default)]
    pub full_page: bool,
    /// Extra HTTP headers; BTreeMap keeps fingerprints order-stable
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<CookieParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_storage: Vec<LocalStorageItem>,
    #[serde(default)]
    pub ignore_robots: bool,
    /// Retire older snapshots of the same URL when this render succeeds
    #[serde(default)]
    pub replace: bool,
    /// Caller is waiting synchronously; bypasses deduplication
    #[serde(default)]
    pub sync: bool,
    /// Source freshness from the sitemap, if this job came from cron
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl CrawlPayload {
    /// A payload for `url` with every option at its default
    #[must_use]
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            include_html: true,
            include_screenshot: true,
            width: default_width(),
            height: default_height(),
            quality: default_quality(),
            format: ImageFormat::default(),
            timeout_ms: default_timeout_ms(),
            wait_time_ms: 0,
            full_page: false,
            headers: BTreeMap::new(),
            cookies: Vec::new(),
            local_storage: Vec::new(),
            ignore_robots: false,
            replace: false,
            sync: false,
            last_modified: None,
        }
    }

    /// Stable fingerprint of the normalized payload.
    ///
    /// Equality over the URL plus every render option, computed as the
    /// xxh3 hash of the canonical (sorted-key) JSON encoding. The `sync`
    /// flag is excluded: sync requests never participate in
    /// deduplication, and a prior async job for the same options should
    /// still match a later async request.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("sync");
        }
        // serde_json maps are BTreeMaps, so this encoding is canonical
        format!("{:016x}", xxh3_64(value.to_string().as_bytes()))
    }
}

/// Explicit result of one handler invocation.
///
/// Retry policy is a pure function of this tag: `Transient` outcomes go
/// back to the store with backoff, `Fatal` and `Success` are terminal.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Render succeeded; the terminal snapshot has been written
    Success(crate::store::Snapshot),
    /// Policy or content decision; recorded as failed, never retried
    Fatal(&'static str),
    /// Transient failure (renderer/browser/timeout); eligible for retry
    Transient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_option_sensitive() {
        let a = CrawlPayload::for_url("https://example.com/a");
        let b = CrawlPayload::for_url("https://example.com/a");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = CrawlPayload::for_url("https://example.com/a");
        c.width = 800;
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_sync_flag() {
        let a = CrawlPayload::for_url("https://example.com/a");
        let mut b = CrawlPayload::for_url("https://example.com/a");
        b.sync = true;
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn payload_round_trips_with_camel_case_names() {
        let mut payload = CrawlPayload::for_url("https://example.com");
        payload.include_screenshot = false;
        payload.headers.insert("x-token".into(), "abc".into());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["includeScreenshot"], false);
        assert_eq!(json["includeHtml"], true);

        let back: CrawlPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn queue_name_round_trips() {
        for queue in QueueName::ALL {
            assert_eq!(QueueName::parse(queue.as_str()), Some(queue));
        }
        assert_eq!(QueueName::parse("codeCrawler"), None);
    }
}
