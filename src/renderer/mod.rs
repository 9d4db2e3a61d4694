//! Page rendering seam.
//!
//! The dispatcher only knows the `PageRenderer` trait; the production
//! implementation is `ChromiumRenderer` over a shared, relaunch-on-crash
//! browser handle. Tests substitute scripted renderers.

pub mod browser;
pub mod chromium;

pub use browser::BrowserHandle;
pub use chromium::ChromiumRenderer;

use async_trait::async_trait;

use crate::error::RenderError;
use crate::queue::CrawlPayload;
use crate::store::SnapshotMeta;

/// The outcome of one page render
#[derive(Debug, Default, Clone)]
pub struct RenderedPage {
    pub html: Option<String>,
    pub screenshot: Option<Vec<u8>>,
    pub meta: SnapshotMeta,
}

impl RenderedPage {
    /// A non-throwing render that produced nothing usable is a fatal,
    /// non-retriable outcome for the job
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.html.is_none() && self.screenshot.is_none()
    }
}

/// Renders one URL into HTML and/or a screenshot.
///
/// Every error from this trait is treated as transient by the
/// dispatcher and consumes one retry; implementations signal
/// content-level emptiness by returning an empty `RenderedPage`
/// instead of erroring.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, payload: &CrawlPayload) -> Result<RenderedPage, RenderError>;
}
