use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::SqlWorkerPoolError;
use crate::future::Promise;
use crate::holder::SqlQueryHolder;
use crate::results::QueryResult;
use crate::statement::PreparedStatement;
use crate::transaction::{self, Transaction};

/// A unit of queued work. Bound to a connection only when a worker pops it.
pub(crate) enum Operation {
    Execute {
        sql: String,
        promise: Option<Promise<bool>>,
    },
    ExecutePrepared {
        stmt: PreparedStatement,
        promise: Option<Promise<bool>>,
    },
    Query {
        sql: String,
        promise: Promise<Option<QueryResult>>,
    },
    QueryPrepared {
        stmt: PreparedStatement,
        promise: Promise<Option<QueryResult>>,
    },
    Transaction {
        tx: Transaction,
        promise: Option<Promise<bool>>,
    },
    Holder {
        holder: SqlQueryHolder,
        promise: Promise<SqlQueryHolder>,
    },
    Ping,
}

impl Operation {
    fn label(&self) -> &'static str {
        match self {
            Operation::Execute { .. } => "execute",
            Operation::ExecutePrepared { .. } => "execute prepared",
            Operation::Query { .. } => "query",
            Operation::QueryPrepared { .. } => "query prepared",
            Operation::Transaction { .. } => "transaction",
            Operation::Holder { .. } => "query holder",
            Operation::Ping => "ping",
        }
    }

    /// Run on `conn` and settle the promise.
    ///
    /// Only fatal errors are returned; everything else is logged and delivered through the
    /// promise as `false` or `None`. A fatal error drops the promise, which breaks its future.
    pub(crate) fn run(
        self,
        conn: &mut Connection,
        deadlock_budget: Duration,
    ) -> Result<(), SqlWorkerPoolError> {
        let label = self.label();
        match self {
            Operation::Execute { sql, promise } => {
                let ok = settle(label, conn.execute(&sql).map(|_| ()))?;
                set_flag(promise.as_ref(), ok);
            }
            Operation::ExecutePrepared { stmt, promise } => {
                let ok = settle(label, conn.execute_prepared(&stmt).map(|_| ()))?;
                set_flag(promise.as_ref(), ok);
            }
            Operation::Query { sql, promise } => {
                let rows = query_outcome(label, conn.query(&sql))?;
                promise.try_set_result(rows);
            }
            Operation::QueryPrepared { stmt, promise } => {
                let rows = query_outcome(label, conn.query_prepared(&stmt))?;
                promise.try_set_result(rows);
            }
            Operation::Transaction { mut tx, promise } => {
                let result = transaction::commit_with_deadlock_retry(conn, &mut tx, deadlock_budget);
                let ok = settle(label, result)?;
                set_flag(promise.as_ref(), ok);
            }
            Operation::Holder {
                mut holder,
                promise,
            } => {
                holder.execute(conn)?;
                promise.try_set_result(holder);
            }
            Operation::Ping => {
                settle(label, conn.ping())?;
            }
        }
        Ok(())
    }
}

/// `Ok(true)` on success, `Ok(false)` on a logged non-fatal failure, `Err` when fatal.
fn settle(label: &str, result: Result<(), SqlWorkerPoolError>) -> Result<bool, SqlWorkerPoolError> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(operation = label, error = %err, "async operation failed");
            Ok(false)
        }
    }
}

fn query_outcome(
    label: &str,
    result: Result<Option<QueryResult>, SqlWorkerPoolError>,
) -> Result<Option<QueryResult>, SqlWorkerPoolError> {
    match result {
        Ok(rows) => {
            if rows.is_none() {
                debug!(operation = label, "query returned no rows");
            }
            Ok(rows)
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(operation = label, error = %err, "async query failed");
            Ok(None)
        }
    }
}

fn set_flag(promise: Option<&Promise<bool>>, value: bool) {
    if let Some(promise) = promise {
        promise.try_set_result(value);
    }
}
