//! The service facade.
//!
//! `SnapKit` owns every long-lived object (database pool, browser
//! handle, per-queue dispatchers, cron scheduler, completion listeners)
//! and exposes the public retrieval API on top of them. Create one at
//! startup, call `shutdown()` on the way out.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;

use crate::config::SnapConfig;
use crate::content::ContentStore;
use crate::error::{Result, SnapError};
use crate::metrics::MetricsCollector;
use crate::queue::{
    CompletionListeners, CrawlContext, CrawlPayload, Dispatcher, Enqueuer, QueueName,
};
use crate::renderer::{BrowserHandle, ChromiumRenderer, PageRenderer};
use crate::site::{SiteCrawlScheduler, cron};
use crate::store::{
    self, JobPage, JobStats, JobStore, Snapshot, SnapshotStatus, SnapshotStore,
};
use crate::utils::{CLAIM_LEASE_MS, format_url};

pub struct SnapKit {
    config: SnapConfig,
    pool: sqlx::SqlitePool,
    jobs: JobStore,
    snapshots: SnapshotStore,
    content: ContentStore,
    enqueuer: Arc<Enqueuer>,
    listeners: Arc<CompletionListeners>,
    metrics: Arc<MetricsCollector>,
    dispatchers: Mutex<Vec<Dispatcher>>,
    cron: Mutex<Option<JobScheduler>>,
    browser: Option<Arc<BrowserHandle>>,
}

impl SnapKit {
    /// Start the service with the production Chromium renderer
    pub async fn start(config: SnapConfig) -> Result<Self> {
        let browser = Arc::new(BrowserHandle::new(
            config.headless(),
            config.browser_path().cloned(),
        ));
        let renderer = Arc::new(ChromiumRenderer::new(Arc::clone(&browser)));
        let mut service = Self::start_with_renderer(config, renderer).await?;
        service.browser = Some(browser);
        Ok(service)
    }

    /// Start the service with a caller-supplied renderer.
    ///
    /// This is the seam tests and embedders use; everything else is
    /// identical to `start`.
    pub async fn start_with_renderer(
        config: SnapConfig,
        renderer: Arc<dyn PageRenderer>,
    ) -> Result<Self> {
        crate::content::ensure_data_dirs(config.data_dir()).await?;

        let pool = store::open_pool(config.data_dir())
            .await
            .map_err(|e| SnapError::Config(format!("store init failed: {e:#}")))?;

        let jobs = JobStore::new(pool.clone());
        let snapshots = SnapshotStore::new(pool.clone());
        let content = ContentStore::new(config.data_dir(), config.app_url());

        // jobs claimed by a previous process run must become claimable
        // again before dispatchers start
        jobs.recover_stale_claims(CLAIM_LEASE_MS).await?;

        let metrics = Arc::new(MetricsCollector::new());
        let listeners = Arc::new(CompletionListeners::new());
        let enqueuer = Arc::new(Enqueuer::new(jobs.clone(), Arc::clone(&metrics)));

        let ctx = Arc::new(CrawlContext {
            config: config.clone(),
            snapshots: snapshots.clone(),
            content: content.clone(),
            renderer,
        });

        let mut dispatchers = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            dispatchers.push(Dispatcher::spawn(
                queue,
                config.queue_concurrency(queue),
                jobs.clone(),
                Arc::clone(&ctx),
                Arc::clone(&listeners),
                Arc::clone(&metrics),
            ));
        }

        let service = Self {
            pool,
            jobs,
            snapshots: snapshots.clone(),
            content,
            enqueuer: Arc::clone(&enqueuer),
            listeners,
            metrics,
            dispatchers: Mutex::new(dispatchers),
            cron: Mutex::new(None),
            browser: None,
            config,
        };

        if service.config.site_cron().enabled {
            let scheduler = Arc::new(SiteCrawlScheduler::new(
                snapshots,
                enqueuer,
                service.config.site_cron().sitemap_concurrency,
            ));
            let cron = cron::start_site_cron(service.config.site_cron(), scheduler)
                .await
                .map_err(|e| SnapError::Config(format!("cron init failed: {e:#}")))?;
            *service.cron.lock().await = Some(cron);
        }

        info!("snapkit service started (data dir {:?})", service.config.data_dir());
        Ok(service)
    }

    /// Enqueue a crawl and return its job id immediately.
    ///
    /// Sync payloads are routed to the dedicated sync queue so a
    /// backlog of fire-and-forget jobs cannot starve waiting callers.
    pub async fn crawl_url(&self, payload: CrawlPayload) -> Result<String> {
        let queue = if payload.sync {
            QueueName::SyncCrawler
        } else {
            QueueName::UrlCrawler
        };
        Ok(self.enqueuer.enqueue_crawl(queue, payload).await?.job_id)
    }

    /// Enqueue a crawl and wait for its terminal snapshot.
    ///
    /// `client_timeout` is the caller's own budget, independent of the
    /// job's render timeout. Returns the formatted snapshot on success,
    /// `None` when the job terminally failed.
    pub async fn crawl_url_sync(
        &self,
        mut payload: CrawlPayload,
        client_timeout: Duration,
    ) -> Result<Option<Snapshot>> {
        payload.sync = true;
        let enqueued = self
            .enqueuer
            .enqueue_crawl(QueueName::SyncCrawler, payload)
            .await?;
        let receiver = self.listeners.register(&enqueued.job_id);

        match tokio::time::timeout(client_timeout, receiver).await {
            Ok(Ok(Some(snapshot))) => {
                let formatted = self.content.format_snapshot(&self.snapshots, snapshot).await?;
                Ok(Some(formatted))
            }
            Ok(Ok(None)) => Ok(None),
            Ok(Err(_)) => {
                warn!("completion channel dropped for job {}", enqueued.job_id);
                Ok(None)
            }
            Err(_) => {
                self.listeners.forget(&enqueued.job_id);
                // the job may have finished in the gap before the
                // listener was registered; prefer its recorded outcome
                if let Some(snapshot) = self.snapshots.find_by_job_id(&enqueued.job_id).await?
                    && snapshot.status == SnapshotStatus::Success
                {
                    let formatted =
                        self.content.format_snapshot(&self.snapshots, snapshot).await?;
                    return Ok(Some(formatted));
                }
                Err(SnapError::Timeout(enqueued.job_id))
            }
        }
    }

    /// Snapshot by job id; a still-queued job yields a pending stub
    pub async fn get_snapshot(&self, job_id: &str) -> Result<Option<Snapshot>> {
        if let Some(snapshot) = self.snapshots.find_by_job_id(job_id).await? {
            let formatted = self.content.format_snapshot(&self.snapshots, snapshot).await?;
            return Ok(Some(formatted));
        }

        if let Some(job) = self.jobs.find_by_id(job_id).await? {
            return Ok(Some(pending_stub(&job)));
        }

        Ok(None)
    }

    /// Latest successful snapshot for a URL, formatted
    pub async fn get_latest_snapshot_for_url(&self, url: &str) -> Result<Option<Snapshot>> {
        let normalized = format_url(url)?;
        match self.snapshots.find_latest_success_for_url(&normalized).await? {
            Some(snapshot) => {
                let formatted = self.content.format_snapshot(&self.snapshots, snapshot).await?;
                Ok(Some(formatted))
            }
            None => Ok(None),
        }
    }

    pub async fn stats(&self) -> Result<JobStats> {
        self.jobs.stats().await
    }

    /// Prometheus text exposition of job metrics and queue depth
    pub async fn metrics_text(&self) -> Result<String> {
        let stats = self.jobs.stats().await?;
        Ok(self.metrics.render(&stats))
    }

    pub async fn paginate_jobs(
        &self,
        page: u32,
        page_size: u32,
        queue: Option<QueueName>,
    ) -> Result<JobPage> {
        self.jobs.paginate(page, page_size, queue).await
    }

    pub async fn delete_jobs_by_queue(&self, queue: QueueName) -> Result<u64> {
        self.jobs.delete_by_queue(queue).await
    }

    pub async fn delete_jobs_by_ids(&self, ids: &[String]) -> Result<u64> {
        self.jobs.delete_by_ids(ids).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        self.jobs.cancel(job_id).await
    }

    /// Stop cron, drain dispatchers, close the browser and the pool
    pub async fn shutdown(self) {
        if let Some(mut cron) = self.cron.lock().await.take()
            && let Err(e) = cron.shutdown().await
        {
            warn!("cron shutdown failed: {e}");
        }

        let dispatchers = std::mem::take(&mut *self.dispatchers.lock().await);
        for dispatcher in dispatchers {
            dispatcher.shutdown().await;
        }

        if let Some(browser) = &self.browser {
            browser.shutdown().await;
        }

        self.pool.close().await;
        info!("snapkit service stopped");
    }
}

/// Placeholder snapshot for a job that has not run yet
fn pending_stub(job: &crate::store::Job) -> Snapshot {
    Snapshot {
        job_id: job.id.clone(),
        url: job.payload.url.clone(),
        status: SnapshotStatus::Pending,
        html: None,
        screenshot: None,
        error: None,
        last_modified: None,
        replace: job.payload.replace,
        meta: None,
        options: None,
        created_at: job.enqueued_at,
        updated_at: job.enqueued_at,
    }
}
