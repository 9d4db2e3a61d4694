//! The durable job queue.
//!
//! Jobs are claimed with a single conditional `UPDATE ... RETURNING`
//! statement so that two dispatchers (or two processes sharing the
//! database file) can never both claim the same row. There is no
//! read-then-write anywhere on the claim path.

use log::{debug, warn};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use crate::error::{Result, SnapError};
use crate::queue::{CrawlPayload, QueueName};

use super::now_ms;

/// A claimable unit of render work
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: QueueName,
    pub payload: CrawlPayload,
    pub retry_count: u32,
    pub will_run_at: i64,
    pub enqueued_at: i64,
    pub cancelled: bool,
}

/// Per-queue job count, used by stats and the queue-depth gauge
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueCount {
    pub queue: String,
    pub count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStats {
    pub total: i64,
    pub queues: Vec<QueueCount>,
}

/// One page of jobs from `paginate`
#[derive(Debug)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub total: i64,
}

#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

const JOB_COLUMNS: &str = "id, queue, payload, retry_count, will_run_at, enqueued_at, cancelled";

impl JobStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new job; durable before this returns.
    ///
    /// `delay_ms` postpones the earliest run time; the job id is
    /// generated here and doubles as the snapshot key once the job
    /// completes.
    pub async fn enqueue(
        &self,
        queue: QueueName,
        payload: &CrawlPayload,
        delay_ms: i64,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = now_ms();

        sqlx::query(
            "INSERT INTO jobs (id, queue, payload, fingerprint, retry_count, will_run_at, enqueued_at, cancelled)
             VALUES (?, ?, ?, ?, 0, ?, ?, 0)",
        )
        .bind(&id)
        .bind(queue.as_str())
        .bind(serde_json::to_string(payload)?)
        .bind(payload.fingerprint())
        .bind(now + delay_ms.max(0))
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!("enqueued job {id} on {queue} for {}", payload.url);
        Ok(id)
    }

    /// Atomically claim up to `limit` due jobs for `claimant`.
    ///
    /// The claim is one conditional UPDATE: rows already claimed,
    /// cancelled, or not yet due are excluded inside the statement, so
    /// concurrent claimers partition the due set instead of racing.
    /// Oldest due jobs are claimed first.
    pub async fn claim_due(
        &self,
        queue: QueueName,
        limit: usize,
        claimant: &str,
    ) -> Result<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = now_ms();

        let rows = sqlx::query(&format!(
            "UPDATE jobs SET claimed_by = ?, claimed_at = ?
             WHERE id IN (
                 SELECT id FROM jobs
                 WHERE queue = ? AND cancelled = 0 AND claimed_by IS NULL AND will_run_at <= ?
                 ORDER BY will_run_at ASC
                 LIMIT ?
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(claimant)
        .bind(now)
        .bind(queue.as_str())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Find the newest non-cancelled job with this payload fingerprint
    pub async fn find_existing(&self, fingerprint: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE fingerprint = ? AND cancelled = 0
             ORDER BY enqueued_at DESC LIMIT 1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Return a transiently failed job to the claimable pool.
    ///
    /// Bumps the retry counter, reschedules `backoff_ms` into the
    /// future and clears the claim in the same statement.
    pub async fn retry(&self, id: &str, backoff_ms: i64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET retry_count = retry_count + 1, will_run_at = ?,
             claimed_by = NULL, claimed_at = NULL
             WHERE id = ?",
        )
        .bind(now_ms() + backoff_ms.max(0))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a job row (terminal outcome recorded elsewhere)
    pub async fn remove(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a job cancelled so no dispatcher will claim it
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE jobs SET cancelled = 1 WHERE id = ? AND claimed_by IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear claims older than `max_age_ms`.
    ///
    /// A claim that old means the claiming process died mid-job; the
    /// row goes back to the pool and will be re-dispatched.
    pub async fn recover_stale_claims(&self, max_age_ms: i64) -> Result<u64> {
        let cutoff = now_ms() - max_age_ms;
        let result = sqlx::query(
            "UPDATE jobs SET claimed_by = NULL, claimed_at = NULL
             WHERE claimed_by IS NOT NULL AND claimed_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!("recovered {recovered} stale job claims");
        }
        Ok(recovered)
    }

    pub async fn count(&self, queue: Option<QueueName>) -> Result<i64> {
        let count: (i64,) = match queue {
            Some(q) => {
                sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE queue = ?")
                    .bind(q.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM jobs")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count.0)
    }

    /// Total and per-queue pending counts
    pub async fn stats(&self) -> Result<JobStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT queue, COUNT(*) FROM jobs GROUP BY queue")
                .fetch_all(&self.pool)
                .await?;

        let queues: Vec<QueueCount> = rows
            .into_iter()
            .map(|(queue, count)| QueueCount { queue, count })
            .collect();
        let total = queues.iter().map(|q| q.count).sum();

        Ok(JobStats { total, queues })
    }

    /// Page through jobs, newest first, optionally scoped to a queue
    pub async fn paginate(
        &self,
        page: u32,
        page_size: u32,
        queue: Option<QueueName>,
    ) -> Result<JobPage> {
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let (rows, total) = match queue {
            Some(q) => {
                let rows = sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE queue = ?
                     ORDER BY enqueued_at DESC LIMIT ? OFFSET ?"
                ))
                .bind(q.as_str())
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                (rows, self.count(Some(q)).await?)
            }
            None => {
                let rows = sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     ORDER BY enqueued_at DESC LIMIT ? OFFSET ?"
                ))
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                (rows, self.count(None).await?)
            }
        };

        let items = rows
            .iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(JobPage { items, total })
    }

    pub async fn delete_by_queue(&self, queue: QueueName) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE queue = ?")
            .bind(queue.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_ids(&self, ids: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let queue_name: String = row.get("queue");
    let queue = QueueName::parse(&queue_name)
        .ok_or_else(|| SnapError::Config(format!("unknown queue in store: {queue_name}")))?;
    let payload: String = row.get("payload");

    Ok(Job {
        id: row.get("id"),
        queue,
        payload: serde_json::from_str(&payload)?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        will_run_at: row.get("will_run_at"),
        enqueued_at: row.get("enqueued_at"),
        cancelled: row.get::<i64, _>("cancelled") != 0,
    })
}
