//! Tests for snapshot persistence: upsert semantics, latest-for-URL
//! ordering, and the transactional replace path with reference-counted
//! file ownership.

use snapkit::store::{Snapshot, SnapshotStatus, SnapshotStore, open_pool};

fn snapshot(job_id: &str, url: &str, status: SnapshotStatus) -> Snapshot {
    let now = chrono::Utc::now().timestamp_millis();
    Snapshot {
        job_id: job_id.to_string(),
        url: url.to_string(),
        status,
        html: None,
        screenshot: None,
        error: None,
        last_modified: Some(chrono::Utc::now().to_rfc3339()),
        replace: false,
        meta: None,
        options: None,
        created_at: now,
        updated_at: now,
    }
}

async fn fresh_store() -> (SnapshotStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = open_pool(dir.path()).await.expect("open pool");
    (SnapshotStore::new(pool), dir)
}

#[tokio::test]
async fn upsert_is_idempotent_per_job_id() {
    let (store, _dir) = fresh_store().await;

    let mut snap = snapshot("job-1", "https://example.com/a", SnapshotStatus::Pending);
    store.upsert(&snap).await.unwrap();

    snap.status = SnapshotStatus::Success;
    snap.html = Some("data/html/abc.html".to_string());
    store.upsert(&snap).await.unwrap();

    let loaded = store.find_by_job_id("job-1").await.unwrap().unwrap();
    assert_eq!(loaded.status, SnapshotStatus::Success);
    assert_eq!(loaded.html.as_deref(), Some("data/html/abc.html"));
    assert_eq!(store.count_for_url("https://example.com/a").await.unwrap(), 1);
}

#[tokio::test]
async fn latest_for_url_prefers_freshest_last_modified() {
    let (store, _dir) = fresh_store().await;

    let mut old = snapshot("job-old", "https://example.com/a", SnapshotStatus::Success);
    old.last_modified = Some("2024-01-01T00:00:00Z".to_string());
    store.upsert(&old).await.unwrap();

    let mut new = snapshot("job-new", "https://example.com/a", SnapshotStatus::Success);
    new.last_modified = Some("2024-02-01T00:00:00Z".to_string());
    store.upsert(&new).await.unwrap();

    let latest = store
        .find_latest_for_url("https://example.com/a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.job_id, "job-new");
}

#[tokio::test]
async fn latest_success_ignores_failed_rows() {
    let (store, _dir) = fresh_store().await;

    let mut failed = snapshot("job-f", "https://example.com/a", SnapshotStatus::Failed);
    failed.last_modified = Some("2024-03-01T00:00:00Z".to_string());
    store.upsert(&failed).await.unwrap();

    let mut ok = snapshot("job-s", "https://example.com/a", SnapshotStatus::Success);
    ok.last_modified = Some("2024-01-01T00:00:00Z".to_string());
    store.upsert(&ok).await.unwrap();

    let latest = store
        .find_latest_success_for_url("https://example.com/a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.job_id, "job-s");
}

#[tokio::test]
async fn replace_retires_old_rows_and_reports_orphans() {
    let (store, _dir) = fresh_store().await;

    let mut old = snapshot("job-old", "https://example.com/a", SnapshotStatus::Success);
    old.replace = true;
    old.html = Some("data/html/old.html".to_string());
    store.upsert(&old).await.unwrap();

    let mut new = snapshot("job-new", "https://example.com/a", SnapshotStatus::Success);
    new.replace = true;
    new.html = Some("data/html/new.html".to_string());

    let orphaned = store.replace_with(&new).await.unwrap();

    assert_eq!(orphaned, vec!["data/html/old.html".to_string()]);
    assert!(store.find_by_job_id("job-old").await.unwrap().is_none());
    assert_eq!(store.count_for_url("https://example.com/a").await.unwrap(), 1);
}

#[tokio::test]
async fn replace_keeps_files_still_referenced_elsewhere() {
    let (store, _dir) = fresh_store().await;

    // a different URL shares the same content hash
    let mut other_url = snapshot("job-other", "https://example.com/b", SnapshotStatus::Success);
    other_url.html = Some("data/html/shared.html".to_string());
    store.upsert(&other_url).await.unwrap();

    let mut old = snapshot("job-old", "https://example.com/a", SnapshotStatus::Success);
    old.replace = true;
    old.html = Some("data/html/shared.html".to_string());
    store.upsert(&old).await.unwrap();

    let mut new = snapshot("job-new", "https://example.com/a", SnapshotStatus::Success);
    new.replace = true;
    new.html = Some("data/html/new.html".to_string());

    let orphaned = store.replace_with(&new).await.unwrap();
    assert!(orphaned.is_empty(), "shared file must survive: {orphaned:?}");
}

#[tokio::test]
async fn replace_keeps_file_reused_by_the_new_snapshot() {
    let (store, _dir) = fresh_store().await;

    // identical render output: the new snapshot carries the same hash
    let mut old = snapshot("job-old", "https://example.com/a", SnapshotStatus::Success);
    old.replace = true;
    old.html = Some("data/html/same.html".to_string());
    store.upsert(&old).await.unwrap();

    let mut new = snapshot("job-new", "https://example.com/a", SnapshotStatus::Success);
    new.replace = true;
    new.html = Some("data/html/same.html".to_string());

    let orphaned = store.replace_with(&new).await.unwrap();
    assert!(orphaned.is_empty());

    let latest = store
        .find_by_job_id("job-new")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.html.as_deref(), Some("data/html/same.html"));
}

#[tokio::test]
async fn replace_leaves_history_rows_alone() {
    let (store, _dir) = fresh_store().await;

    // replace=false rows are retained history, not superseded
    let mut history = snapshot("job-hist", "https://example.com/a", SnapshotStatus::Success);
    history.replace = false;
    history.html = Some("data/html/hist.html".to_string());
    store.upsert(&history).await.unwrap();

    let mut new = snapshot("job-new", "https://example.com/a", SnapshotStatus::Success);
    new.replace = true;
    new.html = Some("data/html/new.html".to_string());

    let orphaned = store.replace_with(&new).await.unwrap();
    assert!(orphaned.is_empty());
    assert!(store.find_by_job_id("job-hist").await.unwrap().is_some());
    assert_eq!(store.count_for_url("https://example.com/a").await.unwrap(), 2);
}

#[tokio::test]
async fn delete_by_job_id_reports_unreferenced_paths() {
    let (store, _dir) = fresh_store().await;

    let mut snap = snapshot("job-1", "https://example.com/a", SnapshotStatus::Success);
    snap.html = Some("data/html/only.html".to_string());
    snap.screenshot = Some("data/screenshot/only.webp".to_string());
    store.upsert(&snap).await.unwrap();

    let mut orphaned = store.delete_by_job_id("job-1").await.unwrap();
    orphaned.sort();
    assert_eq!(
        orphaned,
        vec![
            "data/html/only.html".to_string(),
            "data/screenshot/only.webp".to_string()
        ]
    );
    assert!(store.find_by_job_id("job-1").await.unwrap().is_none());
}
