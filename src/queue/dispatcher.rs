//! Per-queue dispatch loop.
//!
//! Each named queue gets one `Dispatcher` task that repeatedly claims
//! due jobs (up to its free concurrency) and spawns a handler task per
//! claim. Handler outcomes drive the job/snapshot state machine here;
//! nothing a handler does can take the loop down.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;

use crate::metrics::MetricsCollector;
use crate::store::{JobStore, Snapshot, SnapshotStatus};
use crate::utils::MAX_JOB_RETRIES;

use super::handler::{self, CrawlContext};
use super::types::{HandlerOutcome, QueueName};

/// Completion callbacks for in-flight jobs, keyed by job id.
///
/// Delivery is at-most-once: the sender is removed before firing. A job
/// without a registered listener (process restarted, or no caller
/// waiting) still has its outcome durably recorded in the snapshot
/// store and retrievable by polling.
#[derive(Default)]
pub struct CompletionListeners {
    waiting: dashmap::DashMap<String, oneshot::Sender<Option<Snapshot>>>,
}

impl CompletionListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a job's terminal outcome
    pub fn register(&self, job_id: &str) -> oneshot::Receiver<Option<Snapshot>> {
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(job_id.to_string(), tx);
        rx
    }

    /// Fire and consume the listener for `job_id`, if any
    pub fn notify(&self, job_id: &str, snapshot: Option<Snapshot>) {
        if let Some((_, tx)) = self.waiting.remove(job_id) {
            // receiver may have been dropped (caller timed out); fine
            let _ = tx.send(snapshot);
        }
    }

    pub fn forget(&self, job_id: &str) {
        self.waiting.remove(job_id);
    }
}

/// Handle to one running queue dispatcher
pub struct Dispatcher {
    queue: QueueName,
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the dispatch loop for `queue` with the given concurrency.
    pub fn spawn(
        queue: QueueName,
        concurrency: usize,
        jobs: JobStore,
        ctx: Arc<CrawlContext>,
        listeners: Arc<CompletionListeners>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            run_loop(queue, concurrency, jobs, ctx, listeners, metrics, flag).await;
        });

        Self {
            queue,
            shutdown,
            task,
        }
    }

    /// Stop claiming and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.task.await {
            warn!("dispatcher for {} ended abnormally: {e}", self.queue);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    queue: QueueName,
    concurrency: usize,
    jobs: JobStore,
    ctx: Arc<CrawlContext>,
    listeners: Arc<CompletionListeners>,
    metrics: Arc<MetricsCollector>,
    shutdown: Arc<AtomicBool>,
) {
    info!("dispatcher started for {queue} (concurrency {concurrency})");

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let claimant = format!("{queue}-{}", std::process::id());
    let poll = Duration::from_millis(ctx.config.poll_interval_ms());

    while !shutdown.load(Ordering::SeqCst) {
        let free = semaphore.available_permits();
        if free == 0 {
            tokio::time::sleep(poll).await;
            continue;
        }

        let claimed = match jobs.claim_due(queue, free, &claimant).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!("claim failed for {queue}: {e}");
                tokio::time::sleep(poll).await;
                continue;
            }
        };

        if claimed.is_empty() {
            tokio::time::sleep(poll).await;
            continue;
        }

        for job in claimed {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let jobs = jobs.clone();
            let ctx = Arc::clone(&ctx);
            let listeners = Arc::clone(&listeners);
            let metrics = Arc::clone(&metrics);

            tokio::spawn(async move {
                let _permit = permit;
                process_job(queue, jobs, ctx, listeners, metrics, job).await;
            });
        }
    }

    // drain in-flight handlers before reporting shutdown complete
    let _ = semaphore.acquire_many(concurrency as u32).await;
    info!("dispatcher stopped for {queue}");
}

async fn process_job(
    queue: QueueName,
    jobs: JobStore,
    ctx: Arc<CrawlContext>,
    listeners: Arc<CompletionListeners>,
    metrics: Arc<MetricsCollector>,
    job: crate::store::Job,
) {
    let started = Instant::now();
    let outcome = handler::handle_crawl_job(&ctx, &job).await;

    match outcome {
        HandlerOutcome::Success(snapshot) => {
            finish(&jobs, &job.id).await;
            metrics.observe_job(queue, "success", started.elapsed(), job.enqueued_at);
            listeners.notify(&job.id, Some(snapshot));
        }
        HandlerOutcome::Fatal(reason) => {
            let snapshot = handler::convert_job_to_snapshot(
                &job,
                SnapshotStatus::Failed,
                Some(reason.to_string()),
            );
            if let Err(e) = ctx.snapshots.upsert(&snapshot).await {
                error!("failed to record fatal outcome for job {}: {e}", job.id);
            }
            finish(&jobs, &job.id).await;
            metrics.observe_job(queue, "failed", started.elapsed(), job.enqueued_at);
            listeners.notify(&job.id, None);
        }
        HandlerOutcome::Transient(reason) => {
            if job.retry_count < MAX_JOB_RETRIES {
                let attempt = i64::from(job.retry_count) + 1;
                let backoff = ctx.config.retry_backoff_ms() * attempt;
                debug!(
                    "job {} transient failure ({reason}), retry {attempt}/{MAX_JOB_RETRIES} in {backoff}ms",
                    job.id
                );
                if let Err(e) = jobs.retry(&job.id, backoff).await {
                    error!("failed to reschedule job {}: {e}", job.id);
                }
            } else {
                warn!(
                    "job {} abandoned after {MAX_JOB_RETRIES} retries: {reason}",
                    job.id
                );
                let snapshot = handler::convert_job_to_snapshot(
                    &job,
                    SnapshotStatus::Failed,
                    Some("Internal error".to_string()),
                );
                if let Err(e) = ctx.snapshots.upsert(&snapshot).await {
                    error!("failed to record terminal failure for job {}: {e}", job.id);
                }
                finish(&jobs, &job.id).await;
                metrics.observe_job(queue, "failed", started.elapsed(), job.enqueued_at);
                listeners.notify(&job.id, None);
            }
        }
    }
}

/// Remove a terminally finished job row
async fn finish(jobs: &JobStore, job_id: &str) {
    if let Err(e) = jobs.remove(job_id).await {
        error!("failed to remove finished job {job_id}: {e}");
    }
}
