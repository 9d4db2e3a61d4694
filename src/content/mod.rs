//! Content-addressed persistence for rendered HTML and screenshots.
//!
//! Files are named by the xxh3 hash of their bytes under
//! `data/html/<hash>.html` and `data/screenshot/<hash>.<ext>`, so
//! byte-identical renders of different URLs share one file on disk.
//! Snapshot rows store these relative paths; ownership is joint and a
//! file is only unlinked once the store reports no remaining
//! references (see `SnapshotStore::replace_with`).

use log::{debug, warn};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::Result;
use crate::queue::ImageFormat;
use crate::store::{Snapshot, SnapshotStore};
use crate::utils::join_app_url;

/// Relative paths of freshly written content files
#[derive(Debug, Default, Clone)]
pub struct SavedContent {
    pub html: Option<String>,
    pub screenshot: Option<String>,
}

/// Writes and reads content files under the service data directory
#[derive(Clone)]
pub struct ContentStore {
    data_dir: PathBuf,
    app_url: String,
}

impl ContentStore {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, app_url: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            app_url: app_url.into(),
        }
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        self.data_dir.join(relative)
    }

    /// Persist rendered content, returning the relative paths to store
    /// on the snapshot row.
    ///
    /// Each file is written only if a file with the same content hash
    /// is not already present, which deduplicates identical renders
    /// across URLs and attempts.
    pub async fn save(
        &self,
        html: Option<&str>,
        screenshot: Option<&[u8]>,
        format: ImageFormat,
    ) -> Result<SavedContent> {
        let mut saved = SavedContent::default();

        if let Some(html) = html {
            let hash = xxh3_128(html.as_bytes());
            let relative = format!("data/html/{hash:032x}.html");
            self.write_if_absent(&relative, html.as_bytes()).await?;
            saved.html = Some(relative);
        }

        if let Some(bytes) = screenshot {
            let hash = xxh3_128(bytes);
            let relative = format!("data/screenshot/{hash:032x}.{}", format.extension());
            self.write_if_absent(&relative, bytes).await?;
            saved.screenshot = Some(relative);
        }

        Ok(saved)
    }

    async fn write_if_absent(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        let path = self.absolute(relative);
        if tokio::fs::try_exists(&path).await? {
            debug!("content already present, sharing {relative}");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!("wrote content file {relative} ({} bytes)", bytes.len());
        Ok(())
    }

    /// Unlink content files whose last referencing row is gone.
    ///
    /// Best-effort: a failure to remove one file is logged and does not
    /// stop the rest, since an orphaned file only wastes disk.
    pub async fn remove_files(&self, relative_paths: &[String]) {
        for relative in relative_paths {
            let path = self.absolute(relative);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("removed orphaned content file {relative}"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove content file {relative}: {e}"),
            }
        }
    }

    /// Project a snapshot for external consumption.
    ///
    /// Rewrites the screenshot path into an absolute URL, reads the
    /// HTML file into an inline string and strips sensitive option
    /// fields. A missing HTML file marks the row as orphaned: the row
    /// is purged (self-healing) and the snapshot is returned with empty
    /// content instead of an error.
    pub async fn format_snapshot(
        &self,
        snapshots: &SnapshotStore,
        mut snapshot: Snapshot,
    ) -> Result<Snapshot> {
        if let Some(relative) = snapshot.screenshot.take() {
            snapshot.screenshot = Some(join_app_url(&self.app_url, &relative));
        }

        if let Some(relative) = snapshot.html.take() {
            match tokio::fs::read_to_string(self.absolute(&relative)).await {
                Ok(html) => snapshot.html = Some(html),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(
                        "html file {relative} missing for snapshot {}, purging orphaned row",
                        snapshot.job_id
                    );
                    let orphaned = snapshots.delete_by_job_id(&snapshot.job_id).await?;
                    self.remove_files(&orphaned).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(options) = snapshot.options.as_mut() {
            options.cookies.clear();
            options.headers.clear();
            options.local_storage.clear();
        }

        Ok(snapshot)
    }
}

/// Narrow a formatted snapshot to a requested column subset
#[must_use]
pub fn pick_columns(snapshot: &Snapshot, columns: &[String]) -> serde_json::Value {
    let full = serde_json::to_value(snapshot).unwrap_or_default();
    let mut picked = serde_json::Map::new();
    if let Some(map) = full.as_object() {
        for column in columns {
            if let Some(value) = map.get(column) {
                picked.insert(column.clone(), value.clone());
            }
        }
    }
    serde_json::Value::Object(picked)
}

/// Verify the data directories exist, creating them if needed
pub async fn ensure_data_dirs(data_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir.join("data/html")).await?;
    tokio::fs::create_dir_all(data_dir.join("data/screenshot")).await?;
    Ok(())
}
