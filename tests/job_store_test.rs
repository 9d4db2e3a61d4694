//! Tests for the durable job store: claim atomicity, fingerprint
//! lookup, retry bookkeeping and administrative operations.

use snapkit::queue::{CrawlPayload, QueueName};
use snapkit::store::{JobStore, open_pool};

async fn fresh_store() -> (JobStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = open_pool(dir.path()).await.expect("open pool");
    (JobStore::new(pool), dir)
}

#[tokio::test]
async fn enqueue_then_claim_returns_job() {
    let (store, _dir) = fresh_store().await;

    let payload = CrawlPayload::for_url("https://example.com/a");
    let id = store
        .enqueue(QueueName::UrlCrawler, &payload, 0)
        .await
        .unwrap();

    let claimed = store
        .claim_due(QueueName::UrlCrawler, 10, "worker-1")
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].payload.url, "https://example.com/a");
    assert_eq!(claimed[0].retry_count, 0);
}

#[tokio::test]
async fn claimed_jobs_are_not_claimable_again() {
    let (store, _dir) = fresh_store().await;

    let payload = CrawlPayload::for_url("https://example.com/a");
    store
        .enqueue(QueueName::UrlCrawler, &payload, 0)
        .await
        .unwrap();

    let first = store
        .claim_due(QueueName::UrlCrawler, 10, "worker-1")
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    let second = store
        .claim_due(QueueName::UrlCrawler, 10, "worker-2")
        .await
        .unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn concurrent_claimers_never_share_a_job() {
    let (store, _dir) = fresh_store().await;

    for i in 0..20 {
        let payload = CrawlPayload::for_url(format!("https://example.com/p{i}"));
        store
            .enqueue(QueueName::UrlCrawler, &payload, 0)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .claim_due(QueueName::UrlCrawler, 5, &format!("worker-{worker}"))
                .await
                .unwrap()
        }));
    }

    let mut seen = std::collections::HashSet::new();
    let mut total = 0;
    for handle in handles {
        for job in handle.await.unwrap() {
            assert!(seen.insert(job.id.clone()), "job {} claimed twice", job.id);
            total += 1;
        }
    }
    assert_eq!(total, 20);
}

#[tokio::test]
async fn delayed_jobs_are_not_due_yet() {
    let (store, _dir) = fresh_store().await;

    let payload = CrawlPayload::for_url("https://example.com/later");
    store
        .enqueue(QueueName::UrlCrawler, &payload, 60_000)
        .await
        .unwrap();

    let claimed = store
        .claim_due(QueueName::UrlCrawler, 10, "worker-1")
        .await
        .unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn queues_are_isolated() {
    let (store, _dir) = fresh_store().await;

    let payload = CrawlPayload::for_url("https://example.com/a");
    store
        .enqueue(QueueName::CronJobs, &payload, 0)
        .await
        .unwrap();

    let other = store
        .claim_due(QueueName::UrlCrawler, 10, "worker-1")
        .await
        .unwrap();
    assert!(other.is_empty());

    let cron = store
        .claim_due(QueueName::CronJobs, 10, "worker-1")
        .await
        .unwrap();
    assert_eq!(cron.len(), 1);
}

#[tokio::test]
async fn find_existing_matches_full_payload_only() {
    let (store, _dir) = fresh_store().await;

    let payload = CrawlPayload::for_url("https://example.com/a");
    let id = store
        .enqueue(QueueName::UrlCrawler, &payload, 0)
        .await
        .unwrap();

    let found = store
        .find_existing(&payload.fingerprint())
        .await
        .unwrap()
        .expect("fingerprint should match");
    assert_eq!(found.id, id);

    // differing render options must not match
    let mut other = CrawlPayload::for_url("https://example.com/a");
    other.full_page = true;
    assert!(store.find_existing(&other.fingerprint()).await.unwrap().is_none());
}

#[tokio::test]
async fn retry_reschedules_and_clears_claim() {
    let (store, _dir) = fresh_store().await;

    let payload = CrawlPayload::for_url("https://example.com/a");
    let id = store
        .enqueue(QueueName::UrlCrawler, &payload, 0)
        .await
        .unwrap();

    let job = store
        .claim_due(QueueName::UrlCrawler, 1, "worker-1")
        .await
        .unwrap()
        .remove(0);
    store.retry(&job.id, 0).await.unwrap();

    let retried = store
        .claim_due(QueueName::UrlCrawler, 1, "worker-1")
        .await
        .unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].id, id);
    assert_eq!(retried[0].retry_count, 1);
}

#[tokio::test]
async fn cancelled_jobs_are_skipped() {
    let (store, _dir) = fresh_store().await;

    let payload = CrawlPayload::for_url("https://example.com/a");
    let id = store
        .enqueue(QueueName::UrlCrawler, &payload, 0)
        .await
        .unwrap();
    assert!(store.cancel(&id).await.unwrap());

    let claimed = store
        .claim_due(QueueName::UrlCrawler, 10, "worker-1")
        .await
        .unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn stale_claims_are_recoverable() {
    let (store, _dir) = fresh_store().await;

    let payload = CrawlPayload::for_url("https://example.com/a");
    store
        .enqueue(QueueName::UrlCrawler, &payload, 0)
        .await
        .unwrap();
    store
        .claim_due(QueueName::UrlCrawler, 1, "dead-process")
        .await
        .unwrap();

    // a negative max age treats every existing claim as expired
    let recovered = store.recover_stale_claims(-1).await.unwrap();
    assert_eq!(recovered, 1);

    let reclaimed = store
        .claim_due(QueueName::UrlCrawler, 1, "worker-2")
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
}

#[tokio::test]
async fn stats_and_pagination_and_deletes() {
    let (store, _dir) = fresh_store().await;

    for i in 0..3 {
        let payload = CrawlPayload::for_url(format!("https://example.com/u{i}"));
        store
            .enqueue(QueueName::UrlCrawler, &payload, 0)
            .await
            .unwrap();
    }
    let cron_payload = CrawlPayload::for_url("https://example.com/c");
    let cron_id = store
        .enqueue(QueueName::CronJobs, &cron_payload, 0)
        .await
        .unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.queues.len(), 2);

    let page = store
        .paginate(1, 2, Some(QueueName::UrlCrawler))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 3);

    assert_eq!(store.delete_by_ids(&[cron_id]).await.unwrap(), 1);
    assert_eq!(store.delete_by_queue(QueueName::UrlCrawler).await.unwrap(), 3);
    assert_eq!(store.count(None).await.unwrap(), 0);
}
