pub mod config;
pub mod content;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod renderer;
pub mod service;
pub mod site;
pub mod store;
pub mod utils;

pub use config::{SiteConfig, SiteCronConfig, SnapConfig};
pub use content::{ContentStore, pick_columns};
pub use error::{RenderError, SnapError};
pub use metrics::MetricsCollector;
pub use queue::{
    CookieParam, CrawlPayload, HandlerOutcome, ImageFormat, LocalStorageItem, QueueName,
};
pub use renderer::{BrowserHandle, ChromiumRenderer, PageRenderer, RenderedPage};
pub use service::SnapKit;
pub use site::SiteCrawlScheduler;
pub use store::{Job, JobStats, Snapshot, SnapshotMeta, SnapshotStatus};

// Test-accessible modules
pub use policy::{SitemapEntry, parse_robots};
pub use utils::format_url;
