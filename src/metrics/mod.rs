//! Job metrics using lock-free atomic counters.
//!
//! Counters and fixed-bucket histograms accumulate in-process; the
//! queue-depth gauge is read from the job store at render time so it
//! reflects reality after restarts. `render()` emits Prometheus text
//! exposition format for whatever scraper the embedding service wires
//! up.

use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::queue::QueueName;
use crate::store::JobStats;

/// Histogram bucket upper bounds, in seconds.
///
/// Render jobs run tens of seconds to minutes, so buckets start at 10s.
const BUCKET_BOUNDS_SECS: [u64; 9] = [10, 30, 60, 120, 300, 600, 900, 1800, 3600];

#[derive(Default)]
struct Histogram {
    buckets: [AtomicU64; BUCKET_BOUNDS_SECS.len()],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn observe(&self, duration: Duration) {
        let secs = duration.as_secs();
        for (i, bound) in BUCKET_BOUNDS_SECS.iter().enumerate() {
            if secs <= *bound {
                self.buckets[i].fetch_add(1, Ordering::SeqCst);
            }
        }
        self.sum_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Collects job throughput, duration and queue depth
#[derive(Default)]
pub struct MetricsCollector {
    jobs_total: DashMap<(QueueName, &'static str), AtomicU64>,
    jobs_enqueued_total: DashMap<QueueName, AtomicU64>,
    job_duration: DashMap<(QueueName, &'static str), Histogram>,
    job_latency: DashMap<(QueueName, &'static str), Histogram>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_enqueued(&self, queue: QueueName) {
        self.jobs_enqueued_total
            .entry(queue)
            .or_default()
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Record one terminal job outcome.
    ///
    /// `duration` is handler execution time; end-to-end latency is
    /// derived from the job's enqueue timestamp.
    pub fn observe_job(
        &self,
        queue: QueueName,
        status: &'static str,
        duration: Duration,
        enqueued_at_ms: i64,
    ) {
        self.jobs_total
            .entry((queue, status))
            .or_default()
            .fetch_add(1, Ordering::SeqCst);

        self.job_duration
            .entry((queue, status))
            .or_default()
            .observe(duration);

        let latency_ms = (crate::store::now_ms() - enqueued_at_ms).max(0) as u64;
        self.job_latency
            .entry((queue, status))
            .or_default()
            .observe(Duration::from_millis(latency_ms));
    }

    /// Render all metrics in Prometheus text exposition format.
    ///
    /// `job_stats` supplies the current queue depths.
    #[must_use]
    pub fn render(&self, job_stats: &JobStats) -> String {
        let mut out = String::new();

        out.push_str("# HELP snapkit_jobs_total Total number of crawl jobs processed\n");
        out.push_str("# TYPE snapkit_jobs_total counter\n");
        let mut rows: Vec<_> = self
            .jobs_total
            .iter()
            .map(|e| {
                let (queue, status) = *e.key();
                (queue, status, e.value().load(Ordering::SeqCst))
            })
            .collect();
        rows.sort();
        for (queue, status, value) in rows {
            let _ = writeln!(
                out,
                "snapkit_jobs_total{{queue=\"{queue}\",status=\"{status}\"}} {value}"
            );
        }

        out.push_str("# HELP snapkit_jobs_enqueued_total Total number of crawl jobs enqueued\n");
        out.push_str("# TYPE snapkit_jobs_enqueued_total counter\n");
        let mut rows: Vec<_> = self
            .jobs_enqueued_total
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::SeqCst)))
            .collect();
        rows.sort();
        for (queue, value) in rows {
            let _ = writeln!(out, "snapkit_jobs_enqueued_total{{queue=\"{queue}\"}} {value}");
        }

        render_histogram(
            &mut out,
            "snapkit_job_duration_seconds",
            "Duration of crawl job execution in seconds",
            &self.job_duration,
        );
        render_histogram(
            &mut out,
            "snapkit_job_total_latency_seconds",
            "Total latency from enqueue to completion in seconds",
            &self.job_latency,
        );

        out.push_str("# HELP snapkit_queue_size Current number of jobs in queue\n");
        out.push_str("# TYPE snapkit_queue_size gauge\n");
        for entry in &job_stats.queues {
            let _ = writeln!(
                out,
                "snapkit_queue_size{{queue=\"{}\"}} {}",
                entry.queue, entry.count
            );
        }

        out
    }
}

fn render_histogram(
    out: &mut String,
    name: &str,
    help: &str,
    histograms: &DashMap<(QueueName, &'static str), Histogram>,
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} histogram");

    let mut keys: Vec<_> = histograms.iter().map(|e| *e.key()).collect();
    keys.sort();

    for (queue, status) in keys {
        let Some(histogram) = histograms.get(&(queue, status)) else {
            continue;
        };
        for (i, bound) in BUCKET_BOUNDS_SECS.iter().enumerate() {
            let _ = writeln!(
                out,
                "{name}_bucket{{queue=\"{queue}\",status=\"{status}\",le=\"{bound}\"}} {}",
                histogram.buckets[i].load(Ordering::SeqCst)
            );
        }
        let count = histogram.count.load(Ordering::SeqCst);
        let _ = writeln!(
            out,
            "{name}_bucket{{queue=\"{queue}\",status=\"{status}\",le=\"+Inf\"}} {count}"
        );
        let _ = writeln!(
            out,
            "{name}_sum{{queue=\"{queue}\",status=\"{status}\"}} {}",
            histogram.sum_ms.load(Ordering::SeqCst) as f64 / 1000.0
        );
        let _ = writeln!(out, "{name}_count{{queue=\"{queue}\",status=\"{status}\"}} {count}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QueueCount;

    #[test]
    fn render_includes_counters_and_gauge() {
        let metrics = MetricsCollector::new();
        metrics.job_enqueued(QueueName::UrlCrawler);
        metrics.observe_job(
            QueueName::UrlCrawler,
            "success",
            Duration::from_secs(12),
            crate::store::now_ms() - 15_000,
        );

        let stats = JobStats {
            total: 1,
            queues: vec![QueueCount {
                queue: "urlCrawler".to_string(),
                count: 1,
            }],
        };
        let text = metrics.render(&stats);

        assert!(text.contains("snapkit_jobs_total{queue=\"urlCrawler\",status=\"success\"} 1"));
        assert!(text.contains("snapkit_jobs_enqueued_total{queue=\"urlCrawler\"} 1"));
        assert!(text.contains("snapkit_queue_size{queue=\"urlCrawler\"} 1"));
        // 12s lands in the 30s bucket but not the 10s one
        assert!(text.contains(
            "snapkit_job_duration_seconds_bucket{queue=\"urlCrawler\",status=\"success\",le=\"10\"} 0"
        ));
        assert!(text.contains(
            "snapkit_job_duration_seconds_bucket{queue=\"urlCrawler\",status=\"success\",le=\"30\"} 1"
        ));
    }
}
