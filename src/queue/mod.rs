//! Job queue: types, handler, and per-queue dispatchers.

pub mod dispatcher;
pub mod enqueue;
pub mod handler;
pub mod types;

pub use dispatcher::{CompletionListeners, Dispatcher};
pub use enqueue::{Enqueued, Enqueuer};
pub use handler::{CrawlContext, convert_job_to_snapshot, handle_crawl_job};
pub use types::{
    CookieParam, CrawlPayload, HandlerOutcome, ImageFormat, LocalStorageItem, QueueName,
};
