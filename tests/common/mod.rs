//! Shared fixtures for integration tests: scripted renderers and a
//! fast test configuration.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use snapkit::error::RenderError;
use snapkit::renderer::{PageRenderer, RenderedPage};
use snapkit::store::SnapshotMeta;
use snapkit::{CrawlPayload, SnapConfig};

type RenderScript =
    Box<dyn Fn(u32, &CrawlPayload) -> Result<RenderedPage, RenderError> + Send + Sync>;

/// Renderer whose behavior is a function of (call number, payload)
pub struct ScriptedRenderer {
    calls: Arc<AtomicU32>,
    script: RenderScript,
}

impl ScriptedRenderer {
    pub fn new(
        script: impl Fn(u32, &CrawlPayload) -> Result<RenderedPage, RenderError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            script: Box::new(script),
        }
    }

    /// Renderer that always succeeds with fixed HTML
    pub fn always_html(html: &str) -> Self {
        let html = html.to_string();
        Self::new(move |_, _| {
            Ok(RenderedPage {
                html: Some(html.clone()),
                screenshot: None,
                meta: SnapshotMeta {
                    title: "Test Page".to_string(),
                    description: String::new(),
                },
            })
        })
    }

    /// Renderer that always fails with a browser error
    pub fn always_failing() -> Self {
        Self::new(|_, _| Err(RenderError::Browser("scripted failure".to_string())))
    }

    /// Renderer that returns no content at all
    pub fn always_empty() -> Self {
        Self::new(|_, _| Ok(RenderedPage::default()))
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    async fn render(&self, payload: &CrawlPayload) -> Result<RenderedPage, RenderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(call, payload)
    }
}

/// Service config tuned for tests: tight polling, near-zero backoff
pub fn test_config(data_dir: &std::path::Path) -> SnapConfig {
    SnapConfig::builder()
        .data_dir(data_dir)
        .app_url("http://localhost:3000")
        .concurrency(2)
        .poll_interval_ms(20)
        .retry_backoff_ms(10)
        .build()
        .expect("test config is valid")
}

/// Poll until `check` returns Some or the deadline passes
pub async fn wait_for<T, F, Fut>(timeout_ms: u64, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if std::time::Instant::now() > deadline {
            return None;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
}
