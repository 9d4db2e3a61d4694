//! The crawl job handler.
//!
//! Runs one claimed job end to end: robots policy, option merging,
//! render, content persistence and the transactional snapshot write.
//! The return value is an explicit `HandlerOutcome` tag; retry policy
//! lives entirely in the dispatcher and is a pure function of that tag.

use log::{debug, error, info};
use std::time::Duration;

use crate::config::SnapConfig;
use crate::content::ContentStore;
use crate::policy;
use crate::renderer::PageRenderer;
use crate::store::{Job, Snapshot, SnapshotMeta, SnapshotOptions, SnapshotStatus, SnapshotStore};

use super::types::{CrawlPayload, HandlerOutcome};

/// Everything a handler invocation needs, passed by reference from the
/// dispatcher (no module-level state)
pub struct CrawlContext {
    pub config: SnapConfig,
    pub snapshots: SnapshotStore,
    pub content: ContentStore,
    pub renderer: std::sync::Arc<dyn PageRenderer>,
}

/// Build the snapshot row recording an outcome for `job`
#[must_use]
pub fn convert_job_to_snapshot(job: &Job, status: SnapshotStatus, error: Option<String>) -> Snapshot {
    let payload = &job.payload;
    let now = crate::store::now_ms();

    Snapshot {
        job_id: job.id.clone(),
        url: payload.url.clone(),
        status,
        html: None,
        screenshot: None,
        error,
        last_modified: Some(
            payload
                .last_modified
                .clone()
                .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
        ),
        replace: payload.replace,
        meta: None,
        options: Some(SnapshotOptions {
            width: payload.width,
            height: payload.height,
            include_screenshot: payload.include_screenshot,
            include_html: payload.include_html,
            quality: payload.quality,
            full_page: payload.full_page,
            headers: payload.headers.clone(),
            cookies: payload.cookies.clone(),
            local_storage: payload.local_storage.clone(),
        }),
        created_at: now,
        updated_at: now,
    }
}

/// Merge service-wide default cookies/localStorage ahead of the job's own
fn merge_payload(config: &SnapConfig, payload: &CrawlPayload) -> CrawlPayload {
    let mut merged = payload.clone();

    if !config.cookies().is_empty() {
        let mut cookies = config.cookies().to_vec();
        cookies.extend(merged.cookies);
        merged.cookies = cookies;
    }
    if !config.local_storage().is_empty() {
        let mut items = config.local_storage().to_vec();
        items.extend(merged.local_storage);
        merged.local_storage = items;
    }

    merged
}

/// Execute one crawl job.
///
/// Never returns an error: every failure mode collapses into a tagged
/// outcome so the dispatcher loop cannot be crashed from here.
pub async fn handle_crawl_job(ctx: &CrawlContext, job: &Job) -> HandlerOutcome {
    info!("executing crawl job {} for {}", job.id, job.payload.url);

    if !job.payload.ignore_robots && !policy::is_accept_crawler(&job.payload.url).await {
        error!("crawl of {} denied by robots.txt", job.payload.url);
        return HandlerOutcome::Fatal("Denied by robots.txt");
    }

    let payload = merge_payload(&ctx.config, &job.payload);

    // the render itself is bounded by the job's own timeout; a hang
    // counts as a transient failure, not a stuck worker
    let render_budget = Duration::from_millis(payload.timeout_ms.saturating_add(5_000));
    let rendered = match tokio::time::timeout(render_budget, ctx.renderer.render(&payload)).await {
        Ok(Ok(rendered)) => rendered,
        Ok(Err(e)) => {
            error!("failed to render {}: {e}", payload.url);
            return HandlerOutcome::Transient(e.to_string());
        }
        Err(_) => {
            error!("render of {} exceeded {}ms", payload.url, payload.timeout_ms);
            return HandlerOutcome::Transient(format!(
                "render timed out after {}ms",
                payload.timeout_ms
            ));
        }
    };

    if rendered.is_empty() {
        error!("crawl of {} produced no content", payload.url);
        return HandlerOutcome::Fatal("Failed to crawl content");
    }

    let saved = match ctx
        .content
        .save(
            rendered.html.as_deref(),
            rendered.screenshot.as_deref(),
            payload.format,
        )
        .await
    {
        Ok(saved) => saved,
        Err(e) => {
            error!("failed to persist content for {}: {e}", payload.url);
            return HandlerOutcome::Transient(e.to_string());
        }
    };

    let mut snapshot = convert_job_to_snapshot(job, SnapshotStatus::Success, None);
    snapshot.html = saved.html;
    snapshot.screenshot = saved.screenshot;
    snapshot.meta = some_if_present(rendered.meta);

    let write = if payload.replace {
        match ctx.snapshots.replace_with(&snapshot).await {
            Ok(orphaned) => {
                ctx.content.remove_files(&orphaned).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    } else {
        ctx.snapshots.upsert(&snapshot).await
    };

    if let Err(e) = write {
        error!("failed to store snapshot for {}: {e}", payload.url);
        return HandlerOutcome::Transient(e.to_string());
    }

    debug!("crawl job {} completed for {}", job.id, payload.url);
    HandlerOutcome::Success(snapshot)
}

fn some_if_present(meta: SnapshotMeta) -> Option<SnapshotMeta> {
    if meta.title.is_empty() && meta.description.is_empty() {
        None
    } else {
        Some(meta)
    }
}
