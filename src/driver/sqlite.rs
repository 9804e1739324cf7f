use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Statement, ToSql, ffi};

use crate::config::ConnectionInfo;
use crate::driver::error_codes;
use crate::driver::{Driver, NativeConnection};
use crate::error::NativeError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Reference driver backed by `rusqlite`. The `database` field of the connection info is the
/// file path (`:memory:` and `file:` URIs included); host, user and password are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn NativeConnection>, NativeError> {
        let conn = rusqlite::Connection::open(&info.database).map_err(map_sqlite_error)?;
        conn.execute_batch("PRAGMA encoding = 'UTF-8'; PRAGMA foreign_keys = ON;")
            .map_err(map_sqlite_error)?;
        Ok(Box::new(SqliteSession {
            conn,
            prepared: HashMap::new(),
        }))
    }
}

struct SqliteSession {
    conn: rusqlite::Connection,
    // rusqlite statements borrow the connection, so the session keeps the SQL and leans on
    // the statement cache for reuse.
    prepared: HashMap<u32, Arc<String>>,
}

impl SqliteSession {
    fn prepared_sql(&self, index: u32) -> Result<Arc<String>, NativeError> {
        self.prepared.get(&index).cloned().ok_or_else(|| {
            NativeError::new(
                error_codes::ER_UNKNOWN_ERROR,
                format!("statement {index} was never prepared on this session"),
            )
        })
    }
}

impl NativeConnection for SqliteSession {
    fn execute(&mut self, sql: &str) -> Result<u64, NativeError> {
        self.conn.execute_batch(sql).map_err(map_sqlite_error)?;
        Ok(u64::try_from(self.conn.changes()).unwrap_or(0))
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, NativeError> {
        let mut stmt = self.conn.prepare(sql).map_err(map_sqlite_error)?;
        build_result_set(&mut stmt, &[]).map_err(map_sqlite_error)
    }

    fn prepare(&mut self, index: u32, sql: &str) -> Result<usize, NativeError> {
        let count = {
            let stmt = self.conn.prepare_cached(sql).map_err(map_sqlite_error)?;
            stmt.parameter_count()
        };
        self.prepared.insert(index, Arc::new(sql.to_owned()));
        Ok(count)
    }

    fn execute_prepared(&mut self, index: u32, params: &[RowValues]) -> Result<u64, NativeError> {
        let sql = self.prepared_sql(index)?;
        let values = convert_params(params)?;
        let param_refs = values_as_tosql(&values);
        let mut stmt = self
            .conn
            .prepare_cached(sql.as_str())
            .map_err(map_sqlite_error)?;
        let rows = stmt.execute(&param_refs[..]).map_err(map_sqlite_error)?;
        Ok(u64::try_from(rows).unwrap_or(u64::MAX))
    }

    fn query_prepared(
        &mut self,
        index: u32,
        params: &[RowValues],
    ) -> Result<ResultSet, NativeError> {
        let sql = self.prepared_sql(index)?;
        let values = convert_params(params)?;
        let mut stmt = self
            .conn
            .prepare_cached(sql.as_str())
            .map_err(map_sqlite_error)?;
        build_result_set(&mut stmt, &values).map_err(map_sqlite_error)
    }

    fn escape(&self, input: &str) -> String {
        input.replace('\'', "''")
    }

    fn ping(&mut self) -> Result<(), NativeError> {
        self.conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(map_sqlite_error)
    }

    fn server_version(&self) -> String {
        format!("SQLite {}", rusqlite::version())
    }

    fn begin(&mut self) -> Result<(), NativeError> {
        self.conn.execute_batch("BEGIN").map_err(map_sqlite_error)
    }
}

/// Convert a single `RowValues` to a rusqlite `Value`.
///
/// # Errors
/// SQLite integers are signed 64-bit; unsigned values above `i64::MAX` are rejected with
/// `ER_DATA_OUT_OF_RANGE` rather than stored in a form that reads back differently.
pub fn row_value_to_sqlite_value(value: &RowValues) -> Result<Value, NativeError> {
    Ok(match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::UInt(u) => Value::Integer(i64::try_from(*u).map_err(|_| {
            NativeError::new(
                error_codes::ER_DATA_OUT_OF_RANGE,
                format!("unsigned value {u} does not fit a SQLite integer"),
            )
        })?),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    })
}

fn convert_params(params: &[RowValues]) -> Result<Vec<Value>, NativeError> {
    params.iter().map(row_value_to_sqlite_value).collect()
}

fn values_as_tosql(values: &[Value]) -> Vec<&dyn ToSql> {
    values.iter().map(|v| v as &dyn ToSql).collect()
}

fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<RowValues> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

fn build_result_set(stmt: &mut Statement, params: &[Value]) -> rusqlite::Result<ResultSet> {
    let param_refs = values_as_tosql(params);
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(Arc::new(column_names), 10);
    let mut rows_iter = stmt.query(&param_refs[..])?;
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value(row, i)?);
        }
        result_set.push_row(row_values);
    }

    Ok(result_set)
}

/// Fold SQLite failures onto the server code families the engine classifies.
fn map_sqlite_error(err: rusqlite::Error) -> NativeError {
    use rusqlite::ErrorCode;

    let message = err.to_string();
    let extended = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
        _ => None,
    };
    let code = match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation)
            if matches!(
                extended,
                Some(ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
            ) =>
        {
            error_codes::ER_DUP_ENTRY
        }
        // NOT NULL, CHECK and foreign-key failures are not duplicate keys.
        Some(ErrorCode::ConstraintViolation) => error_codes::ER_UNKNOWN_ERROR,
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => error_codes::ER_LOCK_DEADLOCK,
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase) => error_codes::CR_CONN_HOST_ERROR,
        _ if matches!(err, rusqlite::Error::InvalidParameterCount(..)) => {
            error_codes::ER_WRONG_VALUE_COUNT
        }
        _ if message.contains("no such table") => error_codes::ER_NO_SUCH_TABLE,
        _ if message.contains("no such column") || message.contains("has no column named") => {
            error_codes::ER_BAD_FIELD_ERROR
        }
        _ if message.contains("syntax error") || message.contains("incomplete input") => {
            error_codes::ER_PARSE_ERROR
        }
        _ => error_codes::ER_UNKNOWN_ERROR,
    };
    NativeError::new(code, message)
}
