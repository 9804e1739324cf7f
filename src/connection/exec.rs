use std::time::Instant;

use tracing::trace;

use crate::error::SqlWorkerPoolError;
use crate::results::QueryResult;
use crate::statement::PreparedStatement;

use super::{Connection, LostSession};

impl Connection {
    /// Run `sql` and return the number of affected rows.
    ///
    /// # Errors
    /// Data and deadlock errors come back as `Database`; schema errors and failed reconnects as `Fatal`.
    pub fn execute(&mut self, sql: &str) -> Result<u64, SqlWorkerPoolError> {
        self.execute_with(LostSession::Retry, sql)
    }

    pub(crate) fn execute_with(
        &mut self,
        on_lost: LostSession,
        sql: &str,
    ) -> Result<u64, SqlWorkerPoolError> {
        let started = Instant::now();
        let affected = self.with_handle(on_lost, |handle| handle.execute(sql))?;
        trace!(elapsed_ms = started.elapsed().as_millis(), sql, "execute");
        Ok(affected)
    }

    /// Run `sql` and wrap its rows in a cursor. `None` when the query produced no rows.
    ///
    /// # Errors
    /// Data and deadlock errors come back as `Database`; schema errors and failed reconnects as `Fatal`.
    pub fn query(&mut self, sql: &str) -> Result<Option<QueryResult>, SqlWorkerPoolError> {
        let started = Instant::now();
        let rows = self.with_handle(LostSession::Retry, |handle| handle.query(sql))?;
        trace!(
            elapsed_ms = started.elapsed().as_millis(),
            rows = rows.row_count(),
            sql,
            "query"
        );
        Ok(QueryResult::from_result_set(rows))
    }

    /// Execute a bound statement.
    ///
    /// # Errors
    /// Returns `BindingError` if `stmt` is not fully bound, `Unprepared` if its template is
    /// not prepared on this connection, and classified native errors otherwise.
    pub fn execute_prepared(
        &mut self,
        stmt: &PreparedStatement,
    ) -> Result<u64, SqlWorkerPoolError> {
        self.execute_prepared_with(LostSession::Retry, stmt)
    }

    pub(crate) fn execute_prepared_with(
        &mut self,
        on_lost: LostSession,
        stmt: &PreparedStatement,
    ) -> Result<u64, SqlWorkerPoolError> {
        let params = stmt.bound_params()?;
        let id = self.checked_id(stmt)?;
        let started = Instant::now();
        let affected = self.with_handle(on_lost, |handle| handle.execute_prepared(id, &params))?;
        trace!(
            elapsed_ms = started.elapsed().as_millis(),
            statement = id,
            "execute prepared"
        );
        Ok(affected)
    }

    /// Run a bound query. `None` when it produced no rows.
    ///
    /// # Errors
    /// Same as [`Connection::execute_prepared`].
    pub fn query_prepared(
        &mut self,
        stmt: &PreparedStatement,
    ) -> Result<Option<QueryResult>, SqlWorkerPoolError> {
        let params = stmt.bound_params()?;
        let id = self.checked_id(stmt)?;
        let started = Instant::now();
        let rows = self.with_handle(LostSession::Retry, |handle| {
            handle.query_prepared(id, &params)
        })?;
        trace!(
            elapsed_ms = started.elapsed().as_millis(),
            statement = id,
            rows = rows.row_count(),
            "query prepared"
        );
        Ok(QueryResult::from_result_set(rows))
    }

    fn checked_id(&self, stmt: &PreparedStatement) -> Result<u32, SqlWorkerPoolError> {
        let id = stmt.id();
        if self.is_prepared(id) {
            Ok(id)
        } else {
            Err(SqlWorkerPoolError::Unprepared(id))
        }
    }

    /// Escape `input` for inclusion in a quoted SQL literal.
    ///
    /// Uses the session's escaping rules when open, plain backslash escaping otherwise.
    #[must_use]
    pub fn escape_string(&self, input: &str) -> String {
        match self.handle.as_deref() {
            Some(handle) => handle.escape(input),
            None => fallback_escape(input),
        }
    }

    /// Round-trip to the server so it does not drop an idle session.
    ///
    /// # Errors
    /// Classified native errors; a lost session is reconnected first.
    pub fn ping(&mut self) -> Result<(), SqlWorkerPoolError> {
        self.with_handle(LostSession::Retry, |handle| handle.ping())
    }

    /// Version string the server reported, if the session is open.
    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        self.handle.as_deref().map(|handle| handle.server_version())
    }
}

fn fallback_escape(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\x1a' => escaped.push_str("\\Z"),
            '\'' | '"' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
