//! Snapshot rows: the durable outcome of each render attempt.
//!
//! Replace-on-crawl cleanup runs inside a single transaction together
//! with the upsert of the new row, and content-file ownership is
//! decided by live reference count at delete time: a content path is
//! reported orphaned only when no snapshot row points at it once the
//! transaction's deletes and the new upsert are both visible.

use log::debug;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::queue::{CookieParam, LocalStorageItem};

use super::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Pending,
    Success,
    Failed,
}

impl SnapshotStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Page metadata captured during the render
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Render parameters recorded with the snapshot.
///
/// Cookies, headers and localStorage are persisted so a snapshot can be
/// audited, but they are stripped by `content::format_snapshot` before
/// anything leaves the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotOptions {
    pub width: u32,
    pub height: u32,
    pub include_screenshot: bool,
    pub include_html: bool,
    pub quality: u8,
    pub full_page: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<CookieParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_storage: Vec<LocalStorageItem>,
}

/// The persisted outcome of one render attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub job_id: String,
    pub url: String,
    pub status: SnapshotStatus,
    /// Relative path to the stored HTML file, or inline HTML after
    /// formatting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Relative path to the stored screenshot, absolute URL after
    /// formatting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Source content freshness (ISO), distinct from `updated_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Whether this snapshot supersedes older ones for its URL
    #[serde(default)]
    pub replace: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<SnapshotMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SnapshotOptions>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

const SNAPSHOT_COLUMNS: &str = "job_id, url, status, html, screenshot, error, last_modified, \
                                replace_previous, meta, options, created_at, updated_at";

impl SnapshotStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update the snapshot row for a job id
    pub async fn upsert(&self, snapshot: &Snapshot) -> Result<()> {
        upsert_in(&self.pool, snapshot).await
    }

    pub async fn find_by_job_id(&self, job_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE job_id = ?"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    /// Most recent snapshot for a normalized URL, any status.
    ///
    /// Ordered by source freshness first, then write time, matching how
    /// the cron scheduler judges staleness.
    pub async fn find_latest_for_url(&self, url: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE url = ?
             ORDER BY last_modified DESC, updated_at DESC LIMIT 1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    /// Most recent successful snapshot for a normalized URL
    pub async fn find_latest_success_for_url(&self, url: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE url = ? AND status = 'success'
             ORDER BY last_modified DESC, updated_at DESC LIMIT 1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    /// Upsert `snapshot` and retire older replaceable rows for its URL,
    /// all in one transaction.
    ///
    /// Returns the relative content paths whose live reference count
    /// reached zero; the caller unlinks those files after commit. The
    /// count is taken inside the transaction, after both the deletes
    /// and the new upsert, so a shared hash (the new render producing
    /// byte-identical content, or another URL referencing the same
    /// file) is never reported as orphaned.
    pub async fn replace_with(&self, snapshot: &Snapshot) -> Result<Vec<String>> {
        let mut txn = self.pool.begin().await?;

        let old_rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT job_id, html, screenshot FROM snapshots
             WHERE url = ? AND replace_previous = 1 AND job_id != ?",
        )
        .bind(&snapshot.url)
        .bind(&snapshot.job_id)
        .fetch_all(&mut *txn)
        .await?;

        let mut candidates: Vec<String> = Vec::new();
        for (job_id, html, screenshot) in &old_rows {
            sqlx::query("DELETE FROM snapshots WHERE job_id = ?")
                .bind(job_id)
                .execute(&mut *txn)
                .await?;
            candidates.extend(html.iter().cloned());
            candidates.extend(screenshot.iter().cloned());
        }

        upsert_in(&mut *txn, snapshot).await?;

        let mut orphaned = Vec::new();
        candidates.sort();
        candidates.dedup();
        for path in candidates {
            let (refs,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM snapshots WHERE html = ?1 OR screenshot = ?1")
                    .bind(&path)
                    .fetch_one(&mut *txn)
                    .await?;
            if refs == 0 {
                orphaned.push(path);
            }
        }

        txn.commit().await?;

        if !old_rows.is_empty() {
            debug!(
                "replaced {} old snapshot(s) for {} ({} orphaned file(s))",
                old_rows.len(),
                snapshot.url,
                orphaned.len()
            );
        }
        Ok(orphaned)
    }

    /// Delete one snapshot row, returning content paths left unreferenced.
    ///
    /// Used by the self-healing read path when a row's content file has
    /// gone missing.
    pub async fn delete_by_job_id(&self, job_id: &str) -> Result<Vec<String>> {
        let mut txn = self.pool.begin().await?;

        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT html, screenshot FROM snapshots WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&mut *txn)
                .await?;

        let Some((html, screenshot)) = row else {
            txn.commit().await?;
            return Ok(Vec::new());
        };

        sqlx::query("DELETE FROM snapshots WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *txn)
            .await?;

        let mut orphaned = Vec::new();
        for path in [html, screenshot].into_iter().flatten() {
            let (refs,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM snapshots WHERE html = ?1 OR screenshot = ?1")
                    .bind(&path)
                    .fetch_one(&mut *txn)
                    .await?;
            if refs == 0 {
                orphaned.push(path);
            }
        }

        txn.commit().await?;
        Ok(orphaned)
    }

    pub async fn count_for_url(&self, url: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots WHERE url = ?")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn upsert_in<'e, E>(executor: E, snapshot: &Snapshot) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let meta = snapshot
        .meta
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let options = snapshot
        .options
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO snapshots (job_id, url, status, html, screenshot, error, last_modified,
                                replace_previous, meta, options, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(job_id) DO UPDATE SET
             url = excluded.url,
             status = excluded.status,
             html = excluded.html,
             screenshot = excluded.screenshot,
             error = excluded.error,
             last_modified = excluded.last_modified,
             replace_previous = excluded.replace_previous,
             meta = excluded.meta,
             options = excluded.options,
             updated_at = excluded.updated_at",
    )
    .bind(&snapshot.job_id)
    .bind(&snapshot.url)
    .bind(snapshot.status.as_str())
    .bind(&snapshot.html)
    .bind(&snapshot.screenshot)
    .bind(&snapshot.error)
    .bind(&snapshot.last_modified)
    .bind(i64::from(snapshot.replace))
    .bind(meta)
    .bind(options)
    .bind(snapshot.created_at)
    .bind(now_ms())
    .execute(executor)
    .await?;

    Ok(())
}

fn snapshot_from_row(row: &SqliteRow) -> Result<Snapshot> {
    let status_raw: String = row.get("status");
    let status = SnapshotStatus::parse(&status_raw).unwrap_or(SnapshotStatus::Failed);

    let meta: Option<String> = row.get("meta");
    let options: Option<String> = row.get("options");

    Ok(Snapshot {
        job_id: row.get("job_id"),
        url: row.get("url"),
        status,
        html: row.get("html"),
        screenshot: row.get("screenshot"),
        error: row.get("error"),
        last_modified: row.get("last_modified"),
        replace: row.get::<i64, _>("replace_previous") != 0,
        meta: meta.as_deref().map(serde_json::from_str).transpose()?,
        options: options.as_deref().map(serde_json::from_str).transpose()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
