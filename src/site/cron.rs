//! Cron wiring for scheduled sitemap passes.
//!
//! One cron job iterates the configured sites in order; a failure on
//! one site is logged and the tick moves on to the next. The
//! re-entrancy guard inside `SiteCrawlScheduler` keeps overlapping
//! ticks from double-crawling a site whose pass outlives the schedule
//! interval.

use anyhow::Result;
use log::{error, info};
use std::sync::Arc;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use crate::config::SiteCronConfig;

use super::SiteCrawlScheduler;

/// Start the site re-crawl cron per `config`.
///
/// Returns the running scheduler so the service can shut it down.
pub async fn start_site_cron(
    config: &SiteCronConfig,
    scheduler: Arc<SiteCrawlScheduler>,
) -> Result<JobScheduler> {
    let cron = JobScheduler::new().await?;

    let sites = Arc::new(config.sites.clone());

    let job_sites = Arc::clone(&sites);
    let job_scheduler = Arc::clone(&scheduler);
    let crawl_job = CronJob::new_async(config.schedule.as_str(), move |_uuid, _lock| {
        let sites = Arc::clone(&job_sites);
        let scheduler = Arc::clone(&job_scheduler);
        Box::pin(async move {
            run_tick(&sites, &scheduler).await;
        })
    })?;

    cron.add(crawl_job).await?;
    cron.start().await?;

    info!(
        "site re-crawl cron started ({} site(s), schedule {})",
        config.sites.len(),
        config.schedule
    );

    if config.run_on_init {
        let sites = Arc::clone(&sites);
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            run_tick(&sites, &scheduler).await;
        });
    }

    Ok(cron)
}

async fn run_tick(sites: &[crate::config::SiteConfig], scheduler: &SiteCrawlScheduler) {
    for site in sites {
        match scheduler.crawl_site(site).await {
            Ok(job_ids) if job_ids.is_empty() => {
                info!("sitemap tick for {}: nothing to crawl", site.url);
            }
            Ok(job_ids) => {
                info!("sitemap tick for {}: enqueued {} job(s)", site.url, job_ids.len());
            }
            Err(e) => {
                // one bad site must not halt the tick for the others
                error!("sitemap tick failed for {}: {e}", site.url);
            }
        }
    }
}
