//! The public face of the engine: asynchronous workers plus directly borrowed connections.

mod async_ops;
mod sync_ops;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::{ConnectionInfo, PoolOptions};
use crate::connection::Connection;
use crate::driver::Driver;
use crate::error::SqlWorkerPoolError;
use crate::fatal::{ExitProcess, FatalHandler};
use crate::operation::Operation;
use crate::queue::ProducerConsumerQueue;
use crate::statement::{ConnectionKind, PreparedStatement, StatementRegistry};
use crate::worker::{DatabaseWorker, WorkerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Closed,
    Opened,
    Running,
    ShutDown,
}

/// Connection pool for one logical database.
///
/// The asynchronous side is `async_threads` connections, each owned by a worker thread
/// that drains a shared operation queue. The synchronous side is `synch_threads`
/// connections borrowed directly by calling threads. The two sets never mix.
///
/// Lifecycle: [`open`](Self::open), then [`prepare_statements`](Self::prepare_statements)
/// (which starts the workers), then use, then [`close`](Self::close). A closed pool
/// cannot be opened again.
pub struct DatabaseWorkerPool {
    name: String,
    info: ConnectionInfo,
    options: PoolOptions,
    driver: Arc<dyn Driver>,
    registry: Arc<StatementRegistry>,
    fatal: Arc<dyn FatalHandler>,
    queue: Arc<ProducerConsumerQueue<Operation>>,
    /// Opened asynchronous connections waiting for their worker.
    idle_async: Mutex<Vec<Connection>>,
    workers: Vec<DatabaseWorker>,
    sync_connections: Vec<Mutex<Connection>>,
    next_sync: AtomicUsize,
    warn_sync_queries: AtomicBool,
    state: PoolState,
}

/// Builder for [`DatabaseWorkerPool`].
pub struct DatabaseWorkerPoolBuilder {
    name: String,
    info: ConnectionInfo,
    driver: Arc<dyn Driver>,
    options: PoolOptions,
    registry: Arc<StatementRegistry>,
    fatal: Arc<dyn FatalHandler>,
}

impl DatabaseWorkerPoolBuilder {
    #[must_use]
    pub fn options(mut self, options: PoolOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn statements(mut self, registry: impl Into<Arc<StatementRegistry>>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Replace the default [`ExitProcess`] handler.
    #[must_use]
    pub fn fatal_handler(mut self, handler: Arc<dyn FatalHandler>) -> Self {
        self.fatal = handler;
        self
    }

    #[must_use]
    pub fn build(self) -> DatabaseWorkerPool {
        let warn_sync_queries = AtomicBool::new(self.options.warn_about_sync_queries);
        DatabaseWorkerPool {
            name: self.name,
            info: self.info,
            options: self.options,
            driver: self.driver,
            registry: self.registry,
            fatal: self.fatal,
            queue: Arc::new(ProducerConsumerQueue::new()),
            idle_async: Mutex::new(Vec::new()),
            workers: Vec::new(),
            sync_connections: Vec::new(),
            next_sync: AtomicUsize::new(0),
            warn_sync_queries,
            state: PoolState::Closed,
        }
    }
}

impl DatabaseWorkerPool {
    /// Start building a pool called `name` for the database at `info`.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        info: ConnectionInfo,
        driver: Arc<dyn Driver>,
    ) -> DatabaseWorkerPoolBuilder {
        DatabaseWorkerPoolBuilder {
            name: name.into(),
            info,
            driver,
            options: PoolOptions::default(),
            registry: Arc::new(StatementRegistry::new()),
            fatal: Arc::new(ExitProcess),
        }
    }

    /// Open every connection of both sets.
    ///
    /// # Errors
    /// `ConfigError` for zero thread counts or a pool that was already opened; otherwise the
    /// first connection failure, after closing whatever had been opened.
    pub fn open(&mut self) -> Result<(), SqlWorkerPoolError> {
        self.options.validate()?;
        if self.state != PoolState::Closed {
            return Err(SqlWorkerPoolError::ConfigError(format!(
                "database pool '{}' was already opened",
                self.name
            )));
        }

        info!(
            pool = %self.name,
            database = %self.info,
            async_connections = self.options.async_threads,
            sync_connections = self.options.synch_threads,
            "opening database pool"
        );

        if let Err(err) = self.open_connections() {
            error!(pool = %self.name, error = %err, "could not open database pool");
            self.close();
            return Err(err);
        }

        self.state = PoolState::Opened;
        let idle = self.idle_async.get_mut().unwrap_or_else(PoisonError::into_inner).len();
        info!(
            pool = %self.name,
            connections = idle + self.sync_connections.len(),
            "database pool opened"
        );
        Ok(())
    }

    fn open_connections(&mut self) -> Result<(), SqlWorkerPoolError> {
        for _ in 0..self.options.async_threads {
            let conn = self.open_connection(ConnectionKind::Async)?;
            self.idle_async
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .push(conn);
        }
        for _ in 0..self.options.synch_threads {
            let conn = self.open_connection(ConnectionKind::Sync)?;
            self.sync_connections.push(Mutex::new(conn));
        }
        Ok(())
    }

    fn open_connection(&self, kind: ConnectionKind) -> Result<Connection, SqlWorkerPoolError> {
        let mut conn = Connection::new(
            self.info.clone(),
            kind,
            Arc::clone(&self.driver),
            Arc::clone(&self.registry),
            self.options.reconnect_policy(),
        );
        conn.open()?;
        Ok(conn)
    }

    /// Prepare the registered statements on every connection, then start one worker per
    /// asynchronous connection.
    ///
    /// A failure closes the whole pool; it is never left partially prepared.
    ///
    /// # Errors
    /// `ConfigError` if the pool is not open, or the first preparation failure.
    pub fn prepare_statements(&mut self) -> Result<(), SqlWorkerPoolError> {
        if self.state != PoolState::Opened {
            return Err(SqlWorkerPoolError::ConfigError(format!(
                "database pool '{}' must be opened before preparing statements",
                self.name
            )));
        }

        if let Err(err) = self.prepare_and_start() {
            error!(
                pool = %self.name,
                error = %err,
                "could not prepare statements, closing database pool"
            );
            self.close();
            return Err(err);
        }

        self.state = PoolState::Running;
        debug!(pool = %self.name, statements = self.registry.len(), "database pool running");
        Ok(())
    }

    fn prepare_and_start(&mut self) -> Result<(), SqlWorkerPoolError> {
        for conn in self
            .idle_async
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
        {
            conn.prepare_statements()?;
        }
        for conn in &self.sync_connections {
            lock_connection(conn).prepare_statements()?;
        }

        let idle = std::mem::take(self.idle_async.get_mut().unwrap_or_else(PoisonError::into_inner));
        for (index, conn) in idle.into_iter().enumerate() {
            let worker = DatabaseWorker::spawn(
                format!("{}-db-worker-{index}", self.name),
                conn,
                WorkerContext {
                    queue: Arc::clone(&self.queue),
                    fatal: Arc::clone(&self.fatal),
                    deadlock_budget: self.options.deadlock_budget(),
                },
            )?;
            self.workers.push(worker);
        }
        Ok(())
    }

    /// Cancel the queue, wait for the workers, and close every connection.
    ///
    /// Operations still queued are dropped, which breaks their futures. Idempotent.
    pub fn close(&mut self) {
        if self.state == PoolState::ShutDown {
            return;
        }
        info!(pool = %self.name, "closing database pool");

        self.queue.cancel();
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();

        let abandoned = self.queue.drain().len();
        if abandoned > 0 {
            warn!(pool = %self.name, abandoned, "dropped queued operations on close");
        }

        let idle = std::mem::take(self.idle_async.get_mut().unwrap_or_else(PoisonError::into_inner));
        for mut conn in idle {
            conn.shutdown();
        }
        for conn in self.sync_connections.drain(..) {
            conn.into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .shutdown();
        }

        self.state = PoolState::ShutDown;
        info!(pool = %self.name, "database pool closed");
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether workers are running and the pool accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == PoolState::Running
    }

    /// A fresh bound instance of the template registered under `id`.
    ///
    /// # Errors
    /// `ConfigError` if no template is registered under `id`.
    pub fn get_prepared_statement(&self, id: u32) -> Result<PreparedStatement, SqlWorkerPoolError> {
        self.registry
            .get(id)
            .map(|template| PreparedStatement::new(Arc::clone(template)))
            .ok_or_else(|| {
                SqlWorkerPoolError::ConfigError(format!("no statement registered under id {id}"))
            })
    }

    /// Log a warning on every synchronous query from now on (or stop doing so).
    pub fn warn_about_sync_queries(&self, warn: bool) {
        self.warn_sync_queries.store(warn, Ordering::Relaxed);
    }

    /// Ping every synchronous connection not currently in use, and queue one ping per
    /// worker.
    pub fn keep_alive(&self) {
        for conn in &self.sync_connections {
            let mut guard = match conn.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            };
            let result = guard.ping();
            drop(guard);
            if let Err(err) = self.report(result) {
                warn!(pool = %self.name, error = %err, "keep-alive ping failed");
            }
        }
        for _ in 0..self.workers.len() {
            self.enqueue(Operation::Ping);
        }
    }

    /// Borrow a synchronous connection, spinning round-robin until one is free.
    ///
    /// Available from `open` on, so schema updates can run before statements are prepared.
    /// The returned guard releases the connection when dropped.
    fn get_free_connection(&self) -> Result<MutexGuard<'_, Connection>, SqlWorkerPoolError> {
        match self.state {
            PoolState::Opened | PoolState::Running => {}
            PoolState::Closed => {
                return Err(SqlWorkerPoolError::ConfigError(format!(
                    "database pool '{}' must be opened before synchronous use",
                    self.name
                )));
            }
            PoolState::ShutDown => return Err(SqlWorkerPoolError::PoolClosed),
        }
        let count = self.sync_connections.len();
        if count == 0 {
            return Err(SqlWorkerPoolError::PoolClosed);
        }
        let mut index = self.next_sync.fetch_add(1, Ordering::Relaxed);
        loop {
            match self.sync_connections[index % count].try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            index = index.wrapping_add(1);
            if index % count == 0 {
                thread::yield_now();
            }
        }
    }

    fn enqueue(&self, operation: Operation) {
        if self.queue.push(operation).is_err() {
            warn!(pool = %self.name, "database pool is closed, dropping operation");
        }
    }

    /// Hand fatal errors to the fatal handler before returning them.
    fn report<T>(&self, result: Result<T, SqlWorkerPoolError>) -> Result<T, SqlWorkerPoolError> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.fatal.on_fatal(err);
            }
        }
        result
    }
}

fn lock_connection(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for DatabaseWorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseWorkerPool")
            .field("name", &self.name)
            .field("info", &self.info)
            .field("state", &self.state)
            .field("workers", &self.workers.len())
            .field("sync_connections", &self.sync_connections.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Drop for DatabaseWorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}
