//! Durable persistence for jobs and snapshots using SQLite.
//!
//! This module owns the database layer that tracks:
//! - Pending/scheduled crawl jobs (crash-recoverable work queue)
//! - Snapshot rows (the durable outcome of each render attempt)
//!
//! The same pool backs both stores; the job claim statement and the
//! replace-and-upsert transaction are the two serialization points the
//! rest of the service relies on.

pub mod job;
pub mod snapshot;

pub use job::{Job, JobPage, JobStats, JobStore, QueueCount};
pub use snapshot::{Snapshot, SnapshotMeta, SnapshotOptions, SnapshotStatus, SnapshotStore};

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};

/// SQL schema for the job queue and snapshot tables
const SCHEMA_SQL: &str = r#"
-- Durable work queue: one row per pending/scheduled render job
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    queue TEXT NOT NULL,
    payload TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    will_run_at INTEGER NOT NULL,
    enqueued_at INTEGER NOT NULL,
    cancelled INTEGER NOT NULL DEFAULT 0,
    claimed_by TEXT,
    claimed_at INTEGER
);

-- Claim scans are always (queue, due time) ordered
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(queue, will_run_at);

-- Equality lookup for deduplication, replacing payload scans
CREATE INDEX IF NOT EXISTS idx_jobs_fingerprint ON jobs(fingerprint);

-- Snapshot rows: terminal outcome of each job, keyed by job id
CREATE TABLE IF NOT EXISTS snapshots (
    job_id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    status TEXT NOT NULL,
    html TEXT,
    screenshot TEXT,
    error TEXT,
    last_modified TEXT,
    replace_previous INTEGER NOT NULL DEFAULT 0,
    meta TEXT,
    options TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Latest-for-URL lookups and replace cleanup both filter by url
CREATE INDEX IF NOT EXISTS idx_snapshots_url ON snapshots(url);
CREATE INDEX IF NOT EXISTS idx_snapshots_status ON snapshots(status);
"#;

/// Open (or create) the service database under `data_dir`.
///
/// Uses WAL mode so snapshot reads proceed concurrently with dispatcher
/// writes, matching the access pattern of a busy queue.
pub async fn open_pool(data_dir: &Path) -> Result<SqlitePool> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;

    let db_path = data_dir.join("snapkit.db");

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .context("Failed to open SQLite database")?;

    sqlx::query(SCHEMA_SQL)
        .execute(&pool)
        .await
        .context("Failed to initialize database schema")?;

    Ok(pool)
}

/// Current wall-clock time in unix milliseconds
#[must_use]
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
