//! Error types for the snapshot service
//!
//! Two taxonomies: `SnapError` for storage/queue/service operations and
//! `RenderError` for page rendering. Every `RenderError` is treated as
//! transient by the dispatcher; policy outcomes (robots denial, empty
//! content) are not errors at all; see `queue::HandlerOutcome`.

/// Errors surfaced by store, queue and service operations
#[derive(Debug, thiserror::Error)]
pub enum SnapError {
    /// Persistence I/O failure (enqueue/claim/upsert)
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Filesystem failure while persisting or reading content files
    #[error("content io error: {0}")]
    Io(#[from] std::io::Error),

    /// A URL that could not be parsed or normalized
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// JSON (de)serialization of a persisted payload failed
    #[error("payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The dispatcher for a queue has shut down
    #[error("queue {0} is closed")]
    QueueClosed(String),

    /// A synchronous crawl did not finish within the caller's deadline
    #[error("timed out waiting for job {0}")]
    Timeout(String),

    /// Invalid service configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised by a `PageRenderer` implementation
///
/// The dispatcher maps all of these to a retriable (transient) outcome.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Navigation to the target URL failed
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The page responded with a status other than 200/304
    #[error("request failed with status {0}")]
    BadStatus(u16),

    /// Browser-level failure (launch, CDP session, page crash)
    #[error("browser error: {0}")]
    Browser(String),

    /// The render exceeded the job's timeout
    #[error("render timed out after {0}ms")]
    Timeout(u64),
}

/// Convenience alias used throughout the crate
pub type Result<T, E = SnapError> = std::result::Result<T, E>;
