//! Chromium-backed `PageRenderer` implementation.
//!
//! Drives a CDP page through the full capture sequence: viewport,
//! header/cookie/localStorage injection, navigation with status check,
//! network-idle settling, then screenshot and HTML extraction. Only
//! 200/304 document responses are accepted; anything else errors and is
//! retried by the dispatcher.

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide_cdp::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide_cdp::cdp::browser_protocol::network::{
    self, EventResponseReceived, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide_cdp::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
};
use futures::StreamExt;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::RenderError;
use crate::queue::{CrawlPayload, ImageFormat};
use crate::store::SnapshotMeta;

use super::{BrowserHandle, PageRenderer, RenderedPage};

/// Extracts outerHTML plus title/description after tagging the document
/// as crawler-rendered and dropping `<noscript>` fallbacks (they would
/// double-render content that already executed).
const EXTRACT_SCRIPT: &str = r#"
(function() {
    const marker = document.createElement('meta');
    marker.name = 'snapkit-crawler';
    marker.content = 'true';
    document.head.appendChild(marker);

    const title = document.title || '';
    const description = document.querySelector('meta[name="description"]')?.getAttribute('content') || '';

    document.querySelectorAll('noscript').forEach((el) => el.remove());

    return {
        html: document.documentElement.outerHTML,
        title,
        description,
    };
})()
"#;

const SCROLL_HEIGHT_SCRIPT: &str = r#"
(function() {
    return Math.max(
        document.body?.scrollHeight || 0,
        document.documentElement?.scrollHeight || 0
    );
})()
"#;

#[derive(serde::Deserialize)]
struct ExtractedPage {
    html: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

pub struct ChromiumRenderer {
    browser: Arc<BrowserHandle>,
}

impl ChromiumRenderer {
    #[must_use]
    pub fn new(browser: Arc<BrowserHandle>) -> Self {
        Self { browser }
    }

    async fn prepare_page(&self, page: &Page, payload: &CrawlPayload) -> Result<(), RenderError> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(payload.width))
            .height(i64::from(payload.height))
            .device_scale_factor(2.0)
            .mobile(false)
            .build()
            .map_err(RenderError::Browser)?;
        page.execute(metrics)
            .await
            .map_err(|e| RenderError::Browser(format!("viewport setup failed: {e}")))?;

        if !payload.headers.is_empty() {
            let headers = Headers::new(serde_json::json!(payload.headers));
            page.execute(SetExtraHttpHeadersParams::new(headers))
                .await
                .map_err(|e| RenderError::Browser(format!("header setup failed: {e}")))?;
        }

        if !payload.cookies.is_empty() {
            let mut cookies = Vec::with_capacity(payload.cookies.len());
            for cookie in &payload.cookies {
                let mut builder = network::CookieParam::builder()
                    .name(&cookie.name)
                    .value(&cookie.value)
                    .url(&payload.url);
                if let Some(domain) = &cookie.domain {
                    builder = builder.domain(domain);
                }
                builder = builder.path(cookie.path.clone().unwrap_or_else(|| "/".to_string()));
                if let Some(expires) = &cookie.expires
                    && let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(expires)
                {
                    builder =
                        builder.expires(network::TimeSinceEpoch::new(parsed.timestamp() as f64));
                }
                cookies.push(builder.build().map_err(RenderError::Browser)?);
            }
            page.set_cookies(cookies)
                .await
                .map_err(|e| RenderError::Browser(format!("cookie setup failed: {e}")))?;
        }

        if !payload.local_storage.is_empty() {
            let items = serde_json::to_string(&payload.local_storage)
                .map_err(|e| RenderError::Browser(format!("localStorage encode failed: {e}")))?;
            // "now()" expands at document start so freshness-gated
            // storage entries look current to the page
            let script = format!(
                r#"
                const items = {items};
                items.forEach((item) => {{
                    const value = item.value === 'now()' ? new Date().toISOString() : item.value;
                    window.localStorage.setItem(item.key, value);
                }});
                "#
            );
            page.execute(AddScriptToEvaluateOnNewDocumentParams {
                source: script,
                include_command_line_api: None,
                world_name: None,
                run_immediately: None,
            })
            .await
            .map_err(|e| RenderError::Browser(format!("localStorage setup failed: {e}")))?;
        }

        Ok(())
    }

    async fn capture(&self, page: &Page, payload: &CrawlPayload) -> Result<RenderedPage, RenderError> {
        let timeout = Duration::from_millis(payload.timeout_ms);

        // listener must exist before navigation or the document
        // response is missed
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| RenderError::Browser(format!("event listener failed: {e}")))?;

        tokio::time::timeout(timeout, page.goto(payload.url.as_str()))
            .await
            .map_err(|_| RenderError::Timeout(payload.timeout_ms))?
            .map_err(|e| RenderError::Navigation(format!("{e}")))?;

        check_document_status(&mut responses, &payload.url).await?;

        if let Err(e) = tokio::time::timeout(timeout, page.wait_for_navigation()).await {
            debug!("navigation wait elapsed for {}: {e}", payload.url);
        }

        wait_for_page_settled(page, timeout).await;

        if payload.wait_time_ms > 0 {
            tokio::time::sleep(Duration::from_millis(payload.wait_time_ms)).await;
        }

        let mut rendered = RenderedPage::default();

        if payload.include_screenshot {
            if payload.full_page {
                self.expand_to_full_page(page, payload).await;
            }

            let format = match payload.format {
                ImageFormat::Png => CaptureScreenshotFormat::Png,
                ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
                ImageFormat::Webp => CaptureScreenshotFormat::Webp,
            };
            let quality = match payload.format {
                // quality is invalid for lossless png captures
                ImageFormat::Png => None,
                _ => Some(i64::from(payload.quality)),
            };
            let params = CaptureScreenshotParams {
                format: Some(format),
                quality,
                ..Default::default()
            };

            let bytes = page
                .screenshot(params)
                .await
                .map_err(|e| RenderError::Browser(format!("screenshot failed: {e}")))?;
            rendered.screenshot = Some(bytes);
        }

        let extracted: ExtractedPage = page
            .evaluate(EXTRACT_SCRIPT)
            .await
            .map_err(|e| RenderError::Browser(format!("html extraction failed: {e}")))?
            .into_value()
            .map_err(|e| RenderError::Browser(format!("html extraction decode failed: {e}")))?;

        rendered.meta = SnapshotMeta {
            title: extracted.title,
            description: extracted.description,
        };
        if payload.include_html {
            rendered.html = Some(extracted.html);
        }

        Ok(rendered)
    }

    /// Grow the viewport to the page's scroll height so a single
    /// capture covers the whole document
    async fn expand_to_full_page(&self, page: &Page, payload: &CrawlPayload) {
        let height = match page.evaluate(SCROLL_HEIGHT_SCRIPT).await {
            Ok(result) => result.into_value::<i64>().unwrap_or(0),
            Err(e) => {
                warn!("scroll height probe failed for {}: {e}", payload.url);
                return;
            }
        };

        if height <= i64::from(payload.height) {
            return;
        }

        debug!("expanding viewport to {height}px for {}", payload.url);
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(payload.width))
            .height(height)
            .device_scale_factor(2.0)
            .mobile(false)
            .build();
        if let Ok(metrics) = metrics
            && let Err(e) = page.execute(metrics).await
        {
            warn!("full-page viewport expansion failed for {}: {e}", payload.url);
        }
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, payload: &CrawlPayload) -> Result<RenderedPage, RenderError> {
        let page = self.browser.new_page().await?;
        self.prepare_page(&page, payload).await?;
        let result = self.capture(&page, payload).await;

        if let Err(e) = page.close().await {
            debug!("page close failed for {}: {e}", payload.url);
        }

        result
    }
}

/// Wait for the main document response and enforce the status contract
async fn check_document_status(
    responses: &mut chromiumoxide::listeners::EventStream<EventResponseReceived>,
    url: &str,
) -> Result<(), RenderError> {
    let wanted = url.trim_end_matches('/');

    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = responses.next().await {
            if event.response.url.trim_end_matches('/') == wanted {
                return Some(event.response.status);
            }
        }
        None
    })
    .await;

    match result {
        Ok(Some(status)) if status == 200 || status == 304 => Ok(()),
        Ok(Some(status)) => Err(RenderError::BadStatus(status as u16)),
        // document response never observed; leniently proceed, the
        // extraction step will surface a truly broken page
        Ok(None) | Err(_) => {
            debug!("no document response observed for {url}");
            Ok(())
        }
    }
}

/// Poll `document.readyState` until the page is complete or the budget
/// is spent; screenshots of JS-heavy pages are blank without this.
async fn wait_for_page_settled(page: &Page, budget: Duration) {
    let start = Instant::now();
    let max_wait = budget.min(Duration::from_secs(10));
    let poll = Duration::from_millis(100);

    while start.elapsed() < max_wait {
        match page.evaluate("document.readyState").await {
            Ok(result) => {
                if matches!(result.into_value::<String>(), Ok(state) if state == "complete") {
                    break;
                }
            }
            Err(e) => {
                debug!("readyState probe failed: {e}");
                break;
            }
        }
        tokio::time::sleep(poll).await;
    }

    // settle buffer for late layout and lazy images
    tokio::time::sleep(Duration::from_millis(200)).await;
}
