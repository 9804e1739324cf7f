use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::connection::Connection;
use crate::error::SqlWorkerPoolError;
use crate::fatal::FatalHandler;
use crate::operation::Operation;
use crate::queue::ProducerConsumerQueue;

/// A named thread that owns one asynchronous connection and drains the pool's queue.
pub(crate) struct DatabaseWorker {
    name: String,
    handle: Option<JoinHandle<()>>,
}

pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<ProducerConsumerQueue<Operation>>,
    pub(crate) fatal: Arc<dyn FatalHandler>,
    pub(crate) deadlock_budget: Duration,
}

impl DatabaseWorker {
    pub(crate) fn spawn(
        name: String,
        conn: Connection,
        ctx: WorkerContext,
    ) -> Result<Self, SqlWorkerPoolError> {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(conn, &ctx))
            .map_err(|err| {
                SqlWorkerPoolError::ConnectionError(format!(
                    "failed to spawn database worker thread: {err}"
                ))
            })?;
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    /// Wait for the thread to finish. The queue must already be cancelled.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = %self.name, "database worker panicked");
            }
        }
    }
}

fn run_worker(mut conn: Connection, ctx: &WorkerContext) {
    debug!(connection = %conn.info(), "database worker started");
    while let Some(operation) = ctx.queue.wait_and_pop() {
        if let Err(err) = operation.run(&mut conn, ctx.deadlock_budget) {
            ctx.fatal.on_fatal(&err);
        }
    }
    conn.shutdown();
    debug!(connection = %conn.info(), "database worker stopped");
}
