use tracing::warn;

use crate::connection::Connection;
use crate::error::SqlWorkerPoolError;
use crate::results::QueryResult;
use crate::statement::PreparedStatement;

/// A fixed-size batch of bound queries run back to back on one connection.
///
/// Callers fill the slots they need, hand the holder to
/// [`DatabaseWorkerPool::delay_query_holder`](crate::DatabaseWorkerPool::delay_query_holder)
/// and read each slot's result once the returned future completes. Typical use is loading
/// every table a player login needs in one round of queued work.
#[derive(Debug, Default)]
pub struct SqlQueryHolder {
    queries: Vec<Option<PreparedStatement>>,
    results: Vec<Option<QueryResult>>,
}

impl SqlQueryHolder {
    #[must_use]
    pub fn with_size(size: usize) -> Self {
        let mut holder = Self::default();
        holder.set_size(size);
        holder
    }

    /// Resize to `size` slots. Existing slots below `size` keep their query.
    pub fn set_size(&mut self, size: usize) {
        self.queries.resize_with(size, || None);
        self.results.resize_with(size, || None);
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.queries.len()
    }

    /// Put `stmt` in slot `index`. Returns `false` if the slot does not exist.
    pub fn set_prepared_query(&mut self, index: usize, stmt: PreparedStatement) -> bool {
        match self.queries.get_mut(index) {
            Some(slot) => {
                *slot = Some(stmt);
                true
            }
            None => {
                warn!(index, size = self.queries.len(), "query holder slot out of range");
                false
            }
        }
    }

    /// Result of slot `index`; `None` if the slot was empty, failed, or returned no rows.
    #[must_use]
    pub fn get_prepared_result(&self, index: usize) -> Option<&QueryResult> {
        self.results.get(index).and_then(Option::as_ref)
    }

    /// Mutable access, for walking the cursor.
    pub fn get_prepared_result_mut(&mut self, index: usize) -> Option<&mut QueryResult> {
        self.results.get_mut(index).and_then(Option::as_mut)
    }

    /// Move the result of slot `index` out of the holder.
    pub fn take_prepared_result(&mut self, index: usize) -> Option<QueryResult> {
        self.results.get_mut(index).and_then(Option::take)
    }

    /// Run every filled slot on `conn`. Non-fatal failures leave that slot without a
    /// result and the remaining slots still run.
    pub(crate) fn execute(&mut self, conn: &mut Connection) -> Result<(), SqlWorkerPoolError> {
        for (index, (query, result)) in self.queries.iter().zip(self.results.iter_mut()).enumerate()
        {
            let Some(stmt) = query else {
                continue;
            };
            *result = match conn.query_prepared(stmt) {
                Ok(rows) => rows,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(index, statement = stmt.id(), error = %err, "query holder slot failed");
                    None
                }
            };
        }
        Ok(())
    }
}
