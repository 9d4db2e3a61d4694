//! Core configuration types for the snapshot service
//!
//! This module contains the main `SnapConfig` struct and its associated
//! types that define the runtime parameters of the service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::queue::{CookieParam, LocalStorageItem};

/// One site watched by the cron re-crawl scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site root, e.g. `https://docs.example.com`
    pub url: String,
    /// Regex matched against each sitemap entry's URL path; only
    /// matching sections of the site are re-crawled
    #[serde(default = "default_pathname")]
    pub pathname: String,
    /// Minimum days between re-crawls of the same URL (0 = no throttle)
    #[serde(default)]
    pub interval_days: f64,
}

fn default_pathname() -> String {
    ".*".to_string()
}

/// Cron scheduling for sitemap-driven re-crawls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteCronConfig {
    pub enabled: bool,
    /// Six-field cron expression (seconds first), e.g. `"0 0 3 * * *"`
    pub schedule: String,
    /// Also run one pass immediately at service start
    #[serde(default)]
    pub run_on_init: bool,
    pub sites: Vec<SiteConfig>,
    /// Concurrent per-URL staleness checks during a sitemap pass
    #[serde(default = "default_sitemap_concurrency")]
    pub sitemap_concurrency: usize,
}

fn default_sitemap_concurrency() -> usize {
    crate::utils::DEFAULT_SITEMAP_CONCURRENCY
}

impl Default for SiteCronConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: "0 0 3 * * *".to_string(),
            run_on_init: false,
            sites: Vec::new(),
            sitemap_concurrency: default_sitemap_concurrency(),
        }
    }
}

/// Main configuration for the snapshot service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapConfig {
    /// Root directory for the SQLite database and content files.
    ///
    /// **INVARIANT:** snapshot rows store paths relative to this
    /// directory, so it must stay stable across restarts.
    pub(crate) data_dir: PathBuf,
    /// Public base URL of the service; screenshot paths are joined onto
    /// this when snapshots are formatted for external consumption
    pub(crate) app_url: String,
    /// Concurrent jobs per render queue (urlCrawler / syncCrawler)
    pub(crate) concurrency: usize,
    /// Concurrent jobs on the cronJobs queue; lower, since bulk
    /// re-crawls should not starve interactive requests
    pub(crate) cron_concurrency: usize,
    /// Cookies merged (first) into every job's cookie list
    pub(crate) cookies: Vec<CookieParam>,
    /// localStorage entries merged (first) into every job
    pub(crate) local_storage: Vec<LocalStorageItem>,
    pub(crate) site_cron: SiteCronConfig,
    /// Base delay for linear retry backoff (5s in production; tests
    /// shrink it)
    pub(crate) retry_backoff_ms: i64,
    /// Dispatcher poll interval between claim attempts
    pub(crate) poll_interval_ms: u64,
    /// Run the browser headless (disable only for local debugging)
    pub(crate) headless: bool,
    /// Explicit browser executable; autodetected when unset
    pub(crate) browser_path: Option<PathBuf>,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            app_url: "http://localhost:3000".to_string(),
            concurrency: 2,
            cron_concurrency: 1,
            cookies: Vec::new(),
            local_storage: Vec::new(),
            site_cron: SiteCronConfig::default(),
            retry_backoff_ms: crate::utils::RETRY_BACKOFF_BASE_MS,
            poll_interval_ms: crate::utils::DISPATCH_POLL_INTERVAL_MS,
            headless: true,
            browser_path: None,
        }
    }
}

impl SnapConfig {
    #[must_use]
    pub fn builder() -> super::builder::SnapConfigBuilder {
        super::builder::SnapConfigBuilder::default()
    }

    #[must_use]
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    #[must_use]
    pub fn app_url(&self) -> &str {
        &self.app_url
    }

    /// Dispatch concurrency for a queue
    #[must_use]
    pub fn queue_concurrency(&self, queue: crate::queue::QueueName) -> usize {
        match queue {
            crate::queue::QueueName::CronJobs => self.cron_concurrency,
            _ => self.concurrency,
        }
    }

    #[must_use]
    pub fn cookies(&self) -> &[CookieParam] {
        &self.cookies
    }

    #[must_use]
    pub fn local_storage(&self) -> &[LocalStorageItem] {
        &self.local_storage
    }

    #[must_use]
    pub fn site_cron(&self) -> &SiteCronConfig {
        &self.site_cron
    }

    #[must_use]
    pub fn retry_backoff_ms(&self) -> i64 {
        self.retry_backoff_ms
    }

    #[must_use]
    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn browser_path(&self) -> Option<&PathBuf> {
        self.browser_path.as_ref()
    }
}
