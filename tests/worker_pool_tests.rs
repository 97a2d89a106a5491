#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chainrouter::worker_pool::{BackpressureMode, WorkerPool, WorkerPoolConfig};
use common::test_runtime::setup_may_runtime;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// These tests are affected by global env vars. Use a mutex to serialize access.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn clean_worker_pool_env_vars() {
    std::env::remove_var("CHAINR_WORKERS");
    std::env::remove_var("CHAINR_QUEUE_BOUND");
    std::env::remove_var("CHAINR_BACKPRESSURE_MODE");
    std::env::remove_var("CHAINR_STACK_SIZE");
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn test_config_from_env() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_worker_pool_env_vars();

    std::env::set_var("CHAINR_WORKERS", "8");
    std::env::set_var("CHAINR_QUEUE_BOUND", "64");
    std::env::set_var("CHAINR_BACKPRESSURE_MODE", "SHED");
    std::env::set_var("CHAINR_STACK_SIZE", "0x4000");
    let config = WorkerPoolConfig::from_env();
    clean_worker_pool_env_vars();

    assert_eq!(config.num_workers, 8);
    assert_eq!(config.queue_bound, 64);
    assert_eq!(config.backpressure_mode, BackpressureMode::Shed);
    assert_eq!(config.stack_size, 0x4000);
}

#[test]
fn test_invalid_env_values_keep_defaults() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_worker_pool_env_vars();

    std::env::set_var("CHAINR_WORKERS", "many");
    std::env::set_var("CHAINR_BACKPRESSURE_MODE", "drop");
    let config = WorkerPoolConfig::from_env();
    clean_worker_pool_env_vars();

    assert_eq!(config, WorkerPoolConfig::default());
}

#[test]
fn test_jobs_run_and_complete() {
    setup_may_runtime();
    let pool = WorkerPool::new(
        "jobs",
        WorkerPoolConfig::new(2, 128, BackpressureMode::Block, 0x8000),
    )
    .unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let ran = Arc::clone(&ran);
        pool.submit(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(wait_until(Duration::from_secs(5), || ran.load(Ordering::SeqCst) == 50));
    let metrics = pool.metrics();
    assert!(wait_until(Duration::from_secs(5), || metrics.get_completed_count() == 50));
    assert_eq!(metrics.get_dispatched_count(), 50);
    assert_eq!(metrics.get_queue_depth(), 0);
}

#[test]
fn test_panicking_job_does_not_kill_worker() {
    setup_may_runtime();
    let pool = WorkerPool::new(
        "panics",
        WorkerPoolConfig::new(1, 16, BackpressureMode::Block, 0x8000),
    )
    .unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    pool.submit(|| panic!("job exploded"));
    let after = Arc::clone(&ran);
    pool.submit(move || {
        after.fetch_add(1, Ordering::SeqCst);
    });

    assert!(wait_until(Duration::from_secs(5), || ran.load(Ordering::SeqCst) == 1));
    assert_eq!(pool.metrics().get_panicked_count(), 1);
}

#[test]
fn test_shed_mode_refuses_at_bound() {
    setup_may_runtime();
    let pool = WorkerPool::new(
        "shed",
        WorkerPoolConfig::new(1, 1, BackpressureMode::Shed, 0x8000),
    )
    .unwrap();
    let (release_tx, release_rx) = may::sync::mpsc::channel::<()>();

    assert!(pool.try_admit());
    pool.submit(move || {
        let _ = release_rx.recv();
    });
    assert!(!pool.try_admit());
    assert_eq!(pool.metrics().get_shed_count(), 1);

    release_tx.send(()).unwrap();
    let metrics = pool.metrics();
    assert!(wait_until(Duration::from_secs(5), || metrics.get_queue_depth() == 0));
    assert!(pool.try_admit());
}

#[test]
fn test_block_mode_always_admits() {
    setup_may_runtime();
    let pool = WorkerPool::new(
        "block",
        WorkerPoolConfig::new(1, 0, BackpressureMode::Block, 0x8000),
    )
    .unwrap();
    assert!(pool.try_admit());
    assert_eq!(pool.metrics().get_shed_count(), 0);
    assert_eq!(pool.name(), "block");
}
