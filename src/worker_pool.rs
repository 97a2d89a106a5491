//! # Worker Pool Module
//!
//! A bounded set of `may` coroutines that execute chain steps. Every unit
//! evaluation, and every resumption of a deferred unit, is submitted here as
//! an independent job, so consecutive steps of one chain may run on
//! different workers.
//!
//! ## Configuration
//!
//! - `CHAINR_WORKERS`: Number of worker coroutines (default: 4)
//! - `CHAINR_QUEUE_BOUND`: Queue depth at which `shed` mode refuses new requests (default: 1024)
//! - `CHAINR_BACKPRESSURE_MODE`: `block` or `shed` (default: block)
//! - `CHAINR_STACK_SIZE`: Coroutine stack size, decimal or `0x` hex (default: 0x10000)

use may::sync::mpsc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Unit of work executed by a worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// What happens to new requests when the queue is at its bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    /// Accept and queue regardless of depth
    #[default]
    Block,
    /// Refuse new requests with 503 while the queue is full
    Shed,
}

impl FromStr for BackpressureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "shed" => Ok(Self::Shed),
            other => Err(format!("unknown backpressure mode {other:?}")),
        }
    }
}

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker coroutines
    pub num_workers: usize,
    /// Maximum queue depth before shedding
    pub queue_bound: usize,
    /// Backpressure mode
    pub backpressure_mode: BackpressureMode,
    /// Stack size for worker coroutines
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Defaults overridden by `CHAINR_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from any `CHAINR_*` variables that are set and valid
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parse::<usize>("CHAINR_WORKERS") {
            self.num_workers = n;
        }
        if let Some(n) = env_parse::<usize>("CHAINR_QUEUE_BOUND") {
            self.queue_bound = n;
        }
        if let Ok(raw) = std::env::var("CHAINR_BACKPRESSURE_MODE") {
            match raw.parse() {
                Ok(mode) => self.backpressure_mode = mode,
                Err(e) => warn!(error = %e, "Ignoring CHAINR_BACKPRESSURE_MODE"),
            }
        }
        if let Some(size) = std::env::var("CHAINR_STACK_SIZE")
            .ok()
            .and_then(|s| parse_stack_size(&s))
        {
            self.stack_size = size;
        }
    }

    /// Create a custom configuration
    #[must_use]
    pub fn new(
        num_workers: usize,
        queue_bound: usize,
        backpressure_mode: BackpressureMode,
        stack_size: usize,
    ) -> Self {
        Self {
            num_workers,
            queue_bound,
            backpressure_mode,
            stack_size,
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_bound: 1024,
            backpressure_mode: BackpressureMode::Block,
            stack_size: 0x10000, // 64KB
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse a stack size given in decimal or `0x` hex.
#[must_use]
pub fn parse_stack_size(s: &str) -> Option<usize> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Requests refused at admission
    pub shed_count: AtomicU64,
    /// Current queue depth (approximate)
    pub queue_depth: AtomicUsize,
    /// Total jobs submitted
    pub dispatched_count: AtomicU64,
    /// Total jobs finished, including panicked ones
    pub completed_count: AtomicU64,
    /// Jobs that panicked
    pub panicked_count: AtomicU64,
}

impl WorkerPoolMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.panicked_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get_shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_panicked_count(&self) -> u64 {
        self.panicked_count.load(Ordering::Relaxed)
    }
}

/// Coroutine pool executing boxed jobs from one shared queue
pub struct WorkerPool {
    name: Arc<str>,
    config: WorkerPoolConfig,
    sender: mpsc::Sender<Job>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl WorkerPool {
    /// Spawn `config.num_workers` worker coroutines (at least one).
    ///
    /// Fails only when not a single worker could be spawned.
    pub fn new(name: &str, config: WorkerPoolConfig) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let metrics = Arc::new(WorkerPoolMetrics::new());
        let name: Arc<str> = Arc::from(name);

        // All workers share one receiver and load balance across it
        let rx = Arc::new(rx);
        let num_workers = config.num_workers.max(1);

        info!(
            pool = %name,
            num_workers,
            queue_bound = config.queue_bound,
            backpressure_mode = ?config.backpressure_mode,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        let mut spawned = 0usize;
        for worker_id in 0..num_workers {
            let rx = Arc::clone(&rx);
            let pool_name = Arc::clone(&name);
            let metrics = Arc::clone(&metrics);

            // SAFETY: may's spawn is unsafe because coroutines must not block
            // the OS thread on thread-local state or non-may primitives. The
            // worker loop only blocks on may's own channel, and jobs run under
            // catch_unwind so a panicking job cannot unwind the worker.
            #[allow(unsafe_code)]
            let spawn_result = unsafe {
                may::coroutine::Builder::new()
                    .name(format!("{pool_name}-worker-{worker_id}"))
                    .stack_size(config.stack_size)
                    .spawn(move || worker_loop(&pool_name, worker_id, &rx, &metrics))
            };

            match spawn_result {
                Ok(_) => spawned += 1,
                Err(e) => error!(
                    pool = %name,
                    worker_id,
                    error = %e,
                    "Failed to spawn worker coroutine"
                ),
            }
        }
        anyhow::ensure!(spawned > 0, "worker pool {name}: no worker could be spawned");

        Ok(Self {
            name,
            config,
            sender: tx,
            metrics,
        })
    }

    /// Queue a job. Never drops it: if the workers are gone the job runs
    /// inline on the caller.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.metrics.record_dispatch();
        if let Err(std::sync::mpsc::SendError(job)) = self.sender.send(Box::new(job) as Job) {
            error!(pool = %self.name, "Worker pool channel disconnected, running job inline");
            run_job(&self.name, usize::MAX, job, &self.metrics);
        }
    }

    /// Admission check for a new request. Always true in `block` mode.
    #[must_use]
    pub fn try_admit(&self) -> bool {
        if self.config.backpressure_mode == BackpressureMode::Shed
            && self.metrics.get_queue_depth() >= self.config.queue_bound
        {
            self.metrics.record_shed();
            debug!(
                pool = %self.name,
                queue_depth = self.metrics.get_queue_depth(),
                queue_bound = self.config.queue_bound,
                "Shedding request"
            );
            return false;
        }
        true
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

fn worker_loop(
    pool_name: &str,
    worker_id: usize,
    rx: &mpsc::Receiver<Job>,
    metrics: &WorkerPoolMetrics,
) {
    debug!(pool = %pool_name, worker_id, "Worker coroutine started");
    // Process jobs until every sender is gone
    while let Ok(job) = rx.recv() {
        run_job(pool_name, worker_id, job, metrics);
    }
    debug!(pool = %pool_name, worker_id, "Worker coroutine exiting");
}

fn run_job(pool_name: &str, worker_id: usize, job: Job, metrics: &WorkerPoolMetrics) {
    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
        metrics.record_panic();
        error!(
            pool = %pool_name,
            worker_id,
            panic_message = %panic_message(panic.as_ref()),
            "Job panicked outside a unit boundary - CRITICAL"
        );
    }
    metrics.record_completion();
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
