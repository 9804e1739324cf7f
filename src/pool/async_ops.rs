use crate::future::{QueryFuture, promise};
use crate::holder::SqlQueryHolder;
use crate::operation::Operation;
use crate::results::QueryResult;
use crate::statement::PreparedStatement;
use crate::transaction::Transaction;

use super::DatabaseWorkerPool;

impl DatabaseWorkerPool {
    /// Queue `sql` for a worker. The future reports whether it succeeded.
    ///
    /// Dropping the future is fine; the statement still runs.
    pub fn async_execute(&self, sql: impl Into<String>) -> QueryFuture<bool> {
        let (promise, future) = promise();
        self.enqueue(Operation::Execute {
            sql: sql.into(),
            promise: Some(promise),
        });
        future
    }

    /// Queue a bound statement for a worker.
    pub fn async_execute_prepared(&self, stmt: PreparedStatement) -> QueryFuture<bool> {
        let (promise, future) = promise();
        self.enqueue(Operation::ExecutePrepared {
            stmt,
            promise: Some(promise),
        });
        future
    }

    /// Queue a query. The future yields `None` when it returned no rows or failed.
    pub fn async_query(&self, sql: impl Into<String>) -> QueryFuture<Option<QueryResult>> {
        let (promise, future) = promise();
        self.enqueue(Operation::Query {
            sql: sql.into(),
            promise,
        });
        future
    }

    /// Queue a bound query.
    pub fn async_query_prepared(&self, stmt: PreparedStatement) -> QueryFuture<Option<QueryResult>> {
        let (promise, future) = promise();
        self.enqueue(Operation::QueryPrepared { stmt, promise });
        future
    }

    /// Queue `tx` for a worker, which commits it with the same deadlock retry as
    /// [`commit_transaction`](Self::commit_transaction).
    pub fn async_commit_transaction(&self, tx: Transaction) -> QueryFuture<bool> {
        let (promise, future) = promise();
        self.enqueue(Operation::Transaction {
            tx,
            promise: Some(promise),
        });
        future
    }

    /// Append `stmt` to `tx` when there is one, otherwise queue it on its own.
    pub fn execute_or_append(&self, tx: Option<&mut Transaction>, stmt: PreparedStatement) {
        match tx {
            Some(tx) => {
                tx.append_prepared(stmt);
            }
            None => self.enqueue(Operation::ExecutePrepared {
                stmt,
                promise: None,
            }),
        }
    }

    /// Queue every slot of `holder` as one operation; the future hands the holder back with
    /// its results filled in.
    pub fn delay_query_holder(&self, holder: SqlQueryHolder) -> QueryFuture<SqlQueryHolder> {
        let (promise, future) = promise();
        self.enqueue(Operation::Holder { holder, promise });
        future
    }

    /// Number of queued operations no worker has picked up yet.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }
}
