#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use sql_worker_pool::test_utils::{FatalRecorder, MockDriver, test_connection_info};
use sql_worker_pool::{DatabaseWorkerPool, PoolOptions, StatementRegistry};
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test harness; `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options with millisecond reconnect delays so failure scenarios run quickly.
pub fn fast_options(async_threads: u8, synch_threads: u8) -> PoolOptions {
    PoolOptions::new()
        .async_threads(async_threads)
        .synch_threads(synch_threads)
        .reconnect_delay(Duration::from_millis(1))
        .deadlock_retry_budget(Duration::from_secs(5))
}

pub struct MockPool {
    pub pool: DatabaseWorkerPool,
    pub driver: MockDriver,
    pub fatal: Arc<FatalRecorder>,
}

/// Open and start a pool backed by a fresh [`MockDriver`].
pub fn mock_pool(options: PoolOptions, registry: StatementRegistry) -> MockPool {
    let driver = MockDriver::new();
    let fatal = Arc::new(FatalRecorder::new());
    let mut pool = DatabaseWorkerPool::builder("world", test_connection_info(), Arc::new(driver.clone()))
        .options(options)
        .statements(registry)
        .fatal_handler(fatal.clone())
        .build();
    pool.open().expect("open mock pool");
    pool.prepare_statements().expect("prepare mock pool");
    MockPool {
        pool,
        driver,
        fatal,
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
