//! Tests for content-addressed file persistence and snapshot
//! formatting: hash dedup, secret stripping, column projection and the
//! self-healing missing-file path.

use snapkit::content::{ContentStore, pick_columns};
use snapkit::queue::ImageFormat;
use snapkit::store::{
    Snapshot, SnapshotOptions, SnapshotStatus, SnapshotStore, open_pool,
};

async fn fixture() -> (ContentStore, SnapshotStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = open_pool(dir.path()).await.expect("open pool");
    let content = ContentStore::new(dir.path(), "https://app.example.com");
    (content, SnapshotStore::new(pool), dir)
}

fn success_snapshot(job_id: &str, url: &str) -> Snapshot {
    let now = chrono::Utc::now().timestamp_millis();
    Snapshot {
        job_id: job_id.to_string(),
        url: url.to_string(),
        status: SnapshotStatus::Success,
        html: None,
        screenshot: None,
        error: None,
        last_modified: None,
        replace: false,
        meta: None,
        options: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn identical_html_from_different_urls_shares_one_file() {
    let (content, _snapshots, dir) = fixture().await;

    let first = content
        .save(Some("<html>same</html>"), None, ImageFormat::Webp)
        .await
        .unwrap();
    let second = content
        .save(Some("<html>same</html>"), None, ImageFormat::Webp)
        .await
        .unwrap();

    assert_eq!(first.html, second.html);

    let html_dir = dir.path().join("data/html");
    let files: Vec<_> = std::fs::read_dir(&html_dir).unwrap().collect();
    assert_eq!(files.len(), 1, "one copy on disk for identical content");
}

#[tokio::test]
async fn different_content_gets_different_paths() {
    let (content, _snapshots, _dir) = fixture().await;

    let a = content
        .save(Some("<html>a</html>"), None, ImageFormat::Webp)
        .await
        .unwrap();
    let b = content
        .save(Some("<html>b</html>"), None, ImageFormat::Webp)
        .await
        .unwrap();

    assert_ne!(a.html, b.html);
}

#[tokio::test]
async fn screenshot_extension_follows_format() {
    let (content, _snapshots, _dir) = fixture().await;

    let saved = content
        .save(None, Some(b"fake-image-bytes"), ImageFormat::Png)
        .await
        .unwrap();
    assert!(saved.screenshot.unwrap().ends_with(".png"));
}

#[tokio::test]
async fn format_inlines_html_and_absolutizes_screenshot() {
    let (content, snapshots, _dir) = fixture().await;

    let saved = content
        .save(
            Some("<html>rendered</html>"),
            Some(b"image"),
            ImageFormat::Webp,
        )
        .await
        .unwrap();

    let mut snap = success_snapshot("job-1", "https://example.com/a");
    snap.html = saved.html;
    snap.screenshot = saved.screenshot;
    snapshots.upsert(&snap).await.unwrap();

    let formatted = content.format_snapshot(&snapshots, snap).await.unwrap();
    assert_eq!(formatted.html.as_deref(), Some("<html>rendered</html>"));
    assert!(
        formatted
            .screenshot
            .as_deref()
            .unwrap()
            .starts_with("https://app.example.com/data/screenshot/")
    );
}

#[tokio::test]
async fn format_strips_sensitive_options() {
    let (content, snapshots, _dir) = fixture().await;

    let mut snap = success_snapshot("job-1", "https://example.com/a");
    snap.options = Some(SnapshotOptions {
        width: 1440,
        height: 900,
        include_screenshot: false,
        include_html: true,
        quality: 80,
        full_page: false,
        headers: [("authorization".to_string(), "secret".to_string())].into(),
        cookies: vec![snapkit::CookieParam {
            name: "session".to_string(),
            value: "secret".to_string(),
            domain: None,
            path: None,
            expires: None,
        }],
        local_storage: vec![snapkit::LocalStorageItem {
            key: "token".to_string(),
            value: "secret".to_string(),
        }],
    });

    let formatted = content.format_snapshot(&snapshots, snap).await.unwrap();
    let options = formatted.options.unwrap();
    assert!(options.headers.is_empty());
    assert!(options.cookies.is_empty());
    assert!(options.local_storage.is_empty());
    assert_eq!(options.width, 1440);
}

#[tokio::test]
async fn missing_html_file_purges_the_orphaned_row() {
    let (content, snapshots, _dir) = fixture().await;

    let mut snap = success_snapshot("job-1", "https://example.com/a");
    snap.html = Some("data/html/never-written.html".to_string());
    snapshots.upsert(&snap).await.unwrap();

    let formatted = content
        .format_snapshot(&snapshots, snap)
        .await
        .expect("missing file must not error");
    assert!(formatted.html.is_none());

    // self-healing: the orphaned row is gone
    assert!(snapshots.find_by_job_id("job-1").await.unwrap().is_none());
}

#[tokio::test]
async fn pick_columns_projects_subset() {
    let snap = success_snapshot("job-1", "https://example.com/a");
    let projected = pick_columns(&snap, &["jobId".to_string(), "url".to_string()]);

    let map = projected.as_object().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["jobId"], "job-1");
    assert_eq!(map["url"], "https://example.com/a");
}
