use std::sync::atomic::Ordering;

use tracing::warn;

use crate::error::SqlWorkerPoolError;
use crate::results::QueryResult;
use crate::statement::PreparedStatement;
use crate::transaction::{self, Transaction};

use super::DatabaseWorkerPool;

impl DatabaseWorkerPool {
    /// Run `sql` on a synchronous connection, blocking until it finishes.
    ///
    /// # Errors
    /// Non-fatal database errors are returned as-is. Fatal errors are handed to the fatal
    /// handler first, then returned.
    pub fn execute(&self, sql: &str) -> Result<(), SqlWorkerPoolError> {
        let mut conn = self.get_free_connection()?;
        let result = conn.execute(sql).map(|_| ());
        drop(conn);
        self.report(result)
    }

    /// Execute a bound statement synchronously.
    ///
    /// # Errors
    /// As [`execute`](Self::execute), plus `BindingError` for incomplete bindings.
    pub fn execute_prepared(&self, stmt: &PreparedStatement) -> Result<(), SqlWorkerPoolError> {
        let mut conn = self.get_free_connection()?;
        let result = conn.execute_prepared(stmt).map(|_| ());
        drop(conn);
        self.report(result)
    }

    /// Run `sql` synchronously. `Ok(None)` when it returned no rows.
    ///
    /// # Errors
    /// As [`execute`](Self::execute).
    pub fn query(&self, sql: &str) -> Result<Option<QueryResult>, SqlWorkerPoolError> {
        self.warn_if_sync_query(sql);
        let mut conn = self.get_free_connection()?;
        let result = conn.query(sql);
        drop(conn);
        self.report(result)
    }

    /// Run a bound query synchronously. `Ok(None)` when it returned no rows.
    ///
    /// # Errors
    /// As [`execute_prepared`](Self::execute_prepared).
    pub fn query_prepared(
        &self,
        stmt: &PreparedStatement,
    ) -> Result<Option<QueryResult>, SqlWorkerPoolError> {
        self.warn_if_sync_query(stmt.sql());
        let mut conn = self.get_free_connection()?;
        let result = conn.query_prepared(stmt);
        drop(conn);
        self.report(result)
    }

    /// Start collecting statements for an atomic commit.
    #[must_use]
    pub fn begin_transaction(&self) -> Transaction {
        Transaction::new()
    }

    /// Commit `tx` on a synchronous connection, retrying after deadlocks for up to the
    /// configured budget. The calling thread blocks for the whole time.
    ///
    /// # Errors
    /// The first failing element's error, or `DeadlockRetryExhausted`.
    pub fn commit_transaction(&self, mut tx: Transaction) -> Result<(), SqlWorkerPoolError> {
        let mut conn = self.get_free_connection()?;
        let result =
            transaction::commit_with_deadlock_retry(&mut conn, &mut tx, self.options.deadlock_budget());
        drop(conn);
        self.report(result)
    }

    /// Escape `input` with the rules of a synchronous connection.
    ///
    /// # Errors
    /// `ConfigError` before `open`, `PoolClosed` after `close`.
    pub fn escape_string(&self, input: &str) -> Result<String, SqlWorkerPoolError> {
        if input.is_empty() {
            return Ok(String::new());
        }
        let conn = self.get_free_connection()?;
        Ok(conn.escape_string(input))
    }

    /// Version reported by the first synchronous connection's server.
    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        let conn = self.sync_connections.first()?;
        super::lock_connection(conn).server_version()
    }

    fn warn_if_sync_query(&self, sql: &str) {
        if self.warn_sync_queries.load(Ordering::Relaxed) {
            warn!(pool = %self.name, sql, "synchronous query issued");
        }
    }
}
