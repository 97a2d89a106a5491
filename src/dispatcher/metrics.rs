use crate::worker_pool::WorkerPoolMetrics;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only dispatch counters shared by all requests.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub requests: AtomicU64,
    pub answered: AtomicU64,
    pub failed: AtomicU64,
    pub not_found: AtomicU64,
    pub abandoned: AtomicU64,
    pub shed: AtomicU64,
    pub pages_tried: AtomicU64,
    /// Sum of dispatch latencies, for the average gauge
    pub latency_us_total: AtomicU64,
}

impl DispatchMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Requests that reached a terminal disposition.
    #[must_use]
    pub fn completed(&self) -> u64 {
        Self::get(&self.answered)
            + Self::get(&self.failed)
            + Self::get(&self.not_found)
            + Self::get(&self.abandoned)
            + Self::get(&self.shed)
    }

    #[must_use]
    pub fn average_latency_seconds(&self) -> f64 {
        let completed = self.completed();
        if completed == 0 {
            return 0.0;
        }
        Self::get(&self.latency_us_total) as f64 / completed as f64 / 1_000_000.0
    }

    /// Prometheus text exposition of these counters and the pool's.
    #[must_use]
    pub fn render_prometheus(&self, pool: &WorkerPoolMetrics) -> String {
        let mut out = String::with_capacity(2048);
        let counters = [
            ("requests_total", "Requests received", &self.requests),
            ("answered_total", "Requests answered by a page", &self.answered),
            ("failed_total", "Requests answered with a synthetic 500", &self.failed),
            ("not_found_total", "Requests no page answered", &self.not_found),
            ("abandoned_total", "Requests abandoned on a closed channel", &self.abandoned),
            ("shed_total", "Requests refused at admission", &self.shed),
            ("pages_tried_total", "Pages attempted across all requests", &self.pages_tried),
        ];
        for (name, help, counter) in counters {
            let _ = write!(
                out,
                "# HELP chainrouter_{name} {help}\n\
                 # TYPE chainrouter_{name} counter\n\
                 chainrouter_{name} {}\n",
                Self::get(counter)
            );
        }
        let _ = write!(
            out,
            "# HELP chainrouter_dispatch_latency_seconds Average dispatch latency in seconds\n\
             # TYPE chainrouter_dispatch_latency_seconds gauge\n\
             chainrouter_dispatch_latency_seconds {}\n\
             # HELP chainrouter_pool_queue_depth Jobs queued or running\n\
             # TYPE chainrouter_pool_queue_depth gauge\n\
             chainrouter_pool_queue_depth {}\n\
             # HELP chainrouter_pool_jobs_total Jobs submitted to the worker pool\n\
             # TYPE chainrouter_pool_jobs_total counter\n\
             chainrouter_pool_jobs_total {}\n\
             # HELP chainrouter_pool_panics_total Jobs that panicked outside a unit boundary\n\
             # TYPE chainrouter_pool_panics_total counter\n\
             chainrouter_pool_panics_total {}\n",
            self.average_latency_seconds(),
            pool.get_queue_depth(),
            pool.get_dispatched_count(),
            pool.get_panicked_count(),
        );
        out
    }
}
