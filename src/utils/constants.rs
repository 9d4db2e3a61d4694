//! Shared configuration constants for snapkit
//!
//! This module contains default values and configuration constants used
//! throughout the codebase to ensure consistency and avoid magic numbers.

/// Maximum retry attempts for a transiently failed crawl job
///
/// After this many retries the job is abandoned and a terminal failed
/// snapshot ("Internal error") is written. Robots denials and empty
/// content are terminal on the first attempt and never consume retries.
pub const MAX_JOB_RETRIES: u32 = 3;

/// Base delay for linear retry backoff
///
/// A job on its Nth retry is rescheduled `N * RETRY_BACKOFF_BASE_MS`
/// milliseconds into the future.
pub const RETRY_BACKOFF_BASE_MS: i64 = 5_000;

/// Default render timeout per job: 90 seconds
///
/// Render jobs navigate, wait for network idle and capture content;
/// heavy pages routinely need over a minute. Callers can narrow this
/// per job via the payload's `timeout_ms`.
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 90_000;

/// Default viewport width/height for screenshot capture
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1440;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 900;

/// Screenshot quality: 80% compression
///
/// Balances file size (~50-100KB per screenshot) with visual quality.
pub const SCREENSHOT_QUALITY: u8 = 80;

/// How long a claim may be held before it is considered abandoned
///
/// Claims older than this are cleared so jobs from a crashed process
/// return to the claimable pool. Must comfortably exceed the longest
/// render timeout.
pub const CLAIM_LEASE_MS: i64 = 10 * 60 * 1000;

/// Dispatcher poll interval between claim attempts
pub const DISPATCH_POLL_INTERVAL_MS: u64 = 500;

/// Default concurrent staleness checks during a sitemap pass
pub const DEFAULT_SITEMAP_CONCURRENCY: usize = 30;

/// User agent presented when fetching robots.txt and sitemaps
pub const SNAPKIT_USER_AGENT: &str = "Mozilla/5.0 (compatible; snapkit/0.3; +https://github.com/snapkit-dev/snapkit)";
