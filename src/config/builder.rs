//! Fluent builder for `SnapConfig`
//!
//! Validates the few hard requirements (data dir, app URL, sane
//! concurrency) once at construction so the rest of the service can
//! trust the config it is handed.

use std::path::PathBuf;

use crate::error::SnapError;
use crate::queue::{CookieParam, LocalStorageItem};

use super::types::{SiteCronConfig, SnapConfig};

#[derive(Debug, Default)]
pub struct SnapConfigBuilder {
    data_dir: Option<PathBuf>,
    app_url: Option<String>,
    concurrency: Option<usize>,
    cron_concurrency: Option<usize>,
    cookies: Vec<CookieParam>,
    local_storage: Vec<LocalStorageItem>,
    site_cron: Option<SiteCronConfig>,
    retry_backoff_ms: Option<i64>,
    poll_interval_ms: Option<u64>,
    headless: Option<bool>,
    browser_path: Option<PathBuf>,
}

impl SnapConfigBuilder {
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn app_url(mut self, url: impl Into<String>) -> Self {
        self.app_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    #[must_use]
    pub fn cron_concurrency(mut self, limit: usize) -> Self {
        self.cron_concurrency = Some(limit);
        self
    }

    /// Cookies injected into every render, ahead of per-job cookies
    #[must_use]
    pub fn default_cookies(mut self, cookies: Vec<CookieParam>) -> Self {
        self.cookies = cookies;
        self
    }

    /// localStorage seeded into every render, ahead of per-job entries
    #[must_use]
    pub fn default_local_storage(mut self, items: Vec<LocalStorageItem>) -> Self {
        self.local_storage = items;
        self
    }

    #[must_use]
    pub fn site_cron(mut self, cron: SiteCronConfig) -> Self {
        self.site_cron = Some(cron);
        self
    }

    #[must_use]
    pub fn retry_backoff_ms(mut self, backoff: i64) -> Self {
        self.retry_backoff_ms = Some(backoff);
        self
    }

    #[must_use]
    pub fn poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = Some(interval);
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    #[must_use]
    pub fn browser_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.browser_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<SnapConfig, SnapError> {
        let defaults = SnapConfig::default();

        let data_dir = self
            .data_dir
            .ok_or_else(|| SnapError::Config("data_dir is required".to_string()))?;

        let app_url = self.app_url.unwrap_or(defaults.app_url);
        url::Url::parse(&app_url)
            .map_err(|e| SnapError::Config(format!("invalid app_url {app_url}: {e}")))?;

        let concurrency = self.concurrency.unwrap_or(defaults.concurrency);
        let cron_concurrency = self.cron_concurrency.unwrap_or(defaults.cron_concurrency);
        if concurrency == 0 || cron_concurrency == 0 {
            return Err(SnapError::Config(
                "queue concurrency must be at least 1".to_string(),
            ));
        }

        let site_cron = self.site_cron.unwrap_or(defaults.site_cron);
        if site_cron.enabled {
            if site_cron.sites.is_empty() {
                return Err(SnapError::Config(
                    "site_cron enabled with no sites".to_string(),
                ));
            }
            for site in &site_cron.sites {
                regex::Regex::new(&site.pathname).map_err(|e| {
                    SnapError::Config(format!("invalid pathname regex for {}: {e}", site.url))
                })?;
            }
        }

        Ok(SnapConfig {
            data_dir,
            app_url,
            concurrency,
            cron_concurrency,
            cookies: self.cookies,
            local_storage: self.local_storage,
            site_cron,
            retry_backoff_ms: self.retry_backoff_ms.unwrap_or(defaults.retry_backoff_ms),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            headless: self.headless.unwrap_or(defaults.headless),
            browser_path: self.browser_path,
        })
    }
}
