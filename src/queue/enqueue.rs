//! Deduplicating enqueue path.
//!
//! Every crawl request, from API callers and the cron scheduler
//! alike, goes through here. Non-sync requests with a payload fingerprint
//! matching an in-flight job are folded into that job instead of
//! rendering the same page twice.

use log::{debug, info};
use std::sync::Arc;

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::store::JobStore;
use crate::utils::format_url;

use super::types::{CrawlPayload, QueueName};

/// Result of an enqueue attempt.
///
/// `created` is false when deduplication folded the request into an
/// existing job; callers must not attach a fresh completion listener
/// in that case, since the original enqueue owns the job's callback.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub job_id: String,
    pub created: bool,
}

pub struct Enqueuer {
    jobs: JobStore,
    metrics: Arc<MetricsCollector>,
}

impl Enqueuer {
    #[must_use]
    pub fn new(jobs: JobStore, metrics: Arc<MetricsCollector>) -> Self {
        Self { jobs, metrics }
    }

    /// Enqueue a crawl job, deduplicating against in-flight work.
    ///
    /// The URL is normalized first so equivalent spellings share a
    /// fingerprint. `sync` requests bypass deduplication; their caller
    /// is waiting on a completion listener of their own.
    pub async fn enqueue_crawl(
        &self,
        queue: QueueName,
        mut payload: CrawlPayload,
    ) -> Result<Enqueued> {
        payload.url = format_url(&payload.url)?;

        if !payload.sync
            && let Some(existing) = self.jobs.find_existing(&payload.fingerprint()).await?
        {
            info!(
                "crawl job already exists for {}, reusing {}",
                payload.url, existing.id
            );
            return Ok(Enqueued {
                job_id: existing.id,
                created: false,
            });
        }

        let job_id = self.jobs.enqueue(queue, &payload, 0).await?;
        self.metrics.job_enqueued(queue);
        debug!("enqueued crawl of {} as {job_id} on {queue}", payload.url);
        Ok(Enqueued {
            job_id,
            created: true,
        })
    }
}
