//! Sitemap-driven incremental re-crawl scheduling.
//!
//! A pass over one site resolves its sitemaps, filters entries to the
//! configured path section, drops anything still fresh, and fans the
//! rest out as replace-crawl jobs on the cronJobs queue. One pass per
//! `(site, pathname)` at a time; a second tick arriving while a pass is
//! still running is skipped, not queued.

pub mod cron;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashSet;
use futures::StreamExt;
use log::{info, warn};
use regex::Regex;
use std::sync::Arc;

use crate::config::SiteConfig;
use crate::error::{Result, SnapError};
use crate::policy::{self, SitemapEntry};
use crate::queue::{CrawlPayload, Enqueuer, QueueName};
use crate::store::SnapshotStore;
use crate::utils::{format_url, url_pathname};

/// Orchestrates sitemap passes; one instance lives in the service
pub struct SiteCrawlScheduler {
    snapshots: SnapshotStore,
    enqueuer: Arc<Enqueuer>,
    /// Re-entrancy guard keyed by (site url, pathname filter)
    running: DashSet<(String, String)>,
    sitemap_concurrency: usize,
}

/// One URL considered for re-crawling, with its sitemap freshness
struct Candidate {
    url: String,
    lastmod: Option<String>,
}

impl SiteCrawlScheduler {
    #[must_use]
    pub fn new(
        snapshots: SnapshotStore,
        enqueuer: Arc<Enqueuer>,
        sitemap_concurrency: usize,
    ) -> Self {
        Self {
            snapshots,
            enqueuer,
            running: DashSet::new(),
            sitemap_concurrency: sitemap_concurrency.max(1),
        }
    }

    /// Run one sitemap pass for `site`, returning the enqueued job ids.
    ///
    /// Returns an empty list without doing anything when a pass for the
    /// same (url, pathname) is already in flight.
    pub async fn crawl_site(&self, site: &SiteConfig) -> Result<Vec<String>> {
        let key = (site.url.clone(), site.pathname.clone());
        if !self.running.insert(key.clone()) {
            warn!(
                "sitemap pass for {} ({}) already running, skipping tick",
                site.url, site.pathname
            );
            return Ok(Vec::new());
        }

        let result = self.run_pass(site).await;
        // guard released on every path, success or failure
        self.running.remove(&key);
        result
    }

    async fn run_pass(&self, site: &SiteConfig) -> Result<Vec<String>> {
        info!("starting sitemap pass for {} ({})", site.url, site.pathname);

        let entries = policy::get_sitemap_entries(&site.url).await?;
        let pathname_regex = Regex::new(&site.pathname)
            .map_err(|e| SnapError::Config(format!("invalid pathname regex: {e}")))?;

        let candidates = flatten_candidates(&entries, &pathname_regex);
        info!(
            "found {} sitemap candidates matching {} on {}",
            candidates.len(),
            site.pathname,
            site.url
        );

        let interval_ms = (site.interval_days * 24.0 * 60.0 * 60.0 * 1000.0) as i64;

        // staleness checks hit the snapshot store once per candidate;
        // bound the fan-out so a huge sitemap cannot swamp it
        let stale: Vec<Candidate> = futures::stream::iter(candidates)
            .map(|candidate| async move {
                match self.needs_crawl(&candidate, interval_ms).await {
                    Ok(true) => Some(candidate),
                    Ok(false) => None,
                    Err(e) => {
                        warn!("staleness check failed for {}: {e}, skipping", candidate.url);
                        None
                    }
                }
            })
            .buffer_unordered(self.sitemap_concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        info!(
            "{} of sitemap candidates on {} need crawling",
            stale.len(),
            site.url
        );

        let mut job_ids = Vec::with_capacity(stale.len());
        for candidate in stale {
            let mut payload = CrawlPayload::for_url(&candidate.url);
            payload.include_html = true;
            payload.include_screenshot = false;
            payload.replace = true;
            payload.last_modified = candidate.lastmod;

            match self.enqueuer.enqueue_crawl(QueueName::CronJobs, payload).await {
                Ok(enqueued) => job_ids.push(enqueued.job_id),
                Err(e) => warn!("failed to enqueue crawl of {}: {e}", candidate.url),
            }
        }

        Ok(job_ids)
    }

    /// Whether a candidate is stale enough to re-crawl
    async fn needs_crawl(&self, candidate: &Candidate, interval_ms: i64) -> Result<bool> {
        let normalized = format_url(&candidate.url)?;
        let Some(snapshot) = self.snapshots.find_latest_for_url(&normalized).await? else {
            return Ok(true);
        };
        let Some(last_modified) = snapshot.last_modified.as_deref().and_then(parse_time) else {
            return Ok(true);
        };

        // no new content since the last crawl
        if let Some(lastmod) = candidate.lastmod.as_deref().and_then(parse_time)
            && last_modified >= lastmod
        {
            return Ok(false);
        }

        // minimum re-crawl interval not yet reached
        if interval_ms > 0
            && Utc::now().timestamp_millis() - last_modified.timestamp_millis() < interval_ms
        {
            return Ok(false);
        }

        Ok(true)
    }
}

/// Expand sitemap entries into unique candidate URLs.
///
/// Alternate links inherit the parent entry's lastmod; the pathname
/// filter applies to the parent entry, matching how sites publish
/// localized alternates under one canonical entry.
fn flatten_candidates(entries: &[SitemapEntry], pathname: &Regex) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    let mut candidates = Vec::new();

    for entry in entries {
        if !pathname.is_match(&url_pathname(&entry.url)) {
            continue;
        }
        for url in entry.links.iter().chain(std::iter::once(&entry.url)) {
            if seen.insert(url.clone()) {
                candidates.push(Candidate {
                    url: url.clone(),
                    lastmod: entry.lastmod.clone(),
                });
            }
        }
    }

    candidates
}

/// Parse a sitemap/snapshot timestamp: RFC 3339 first, then bare dates
fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
