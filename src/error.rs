use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::driver::error_codes;

/// Error reported by a native database session: the server's numeric code plus its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: u32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        classify(self.code)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for NativeError {}

/// How the engine reacts to a native error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Session lost or unreachable; the connection reconnects and retries.
    ConnectionLost,
    /// Lock deadlock; only transactions retry, under the deadlock budget.
    Deadlock,
    /// Duplicate key, wrong value count, out-of-range value. Reported to the caller as-is.
    Data,
    /// Missing table/column or malformed SQL. Fatal.
    Schema,
    /// Anything else. Logged and reported as a generic failure.
    Other,
}

/// Map a native error code onto its [`ErrorClass`].
#[must_use]
pub fn classify(code: u32) -> ErrorClass {
    match code {
        error_codes::CR_SERVER_GONE_ERROR
        | error_codes::CR_SERVER_LOST
        | error_codes::CR_SERVER_LOST_EXTENDED
        | error_codes::CR_CONN_HOST_ERROR => ErrorClass::ConnectionLost,
        error_codes::ER_LOCK_DEADLOCK => ErrorClass::Deadlock,
        error_codes::ER_DUP_ENTRY
        | error_codes::ER_WRONG_VALUE_COUNT
        | error_codes::ER_DATA_OUT_OF_RANGE => ErrorClass::Data,
        error_codes::ER_BAD_FIELD_ERROR
        | error_codes::ER_NO_SUCH_TABLE
        | error_codes::ER_PARSE_ERROR => ErrorClass::Schema,
        _ => ErrorClass::Other,
    }
}

/// Why the engine gave up and asked the supervisor to shut the process down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    /// Every reconnect attempt failed.
    ReconnectExhausted { attempts: u32, last: NativeError },
    /// The schema does not match the statements the code issues.
    SchemaMismatch(NativeError),
    /// The session kept dropping right after successful reconnects.
    RetryLoop { retries: u32, last: NativeError },
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReconnectExhausted { attempts, last } => {
                write!(f, "failed to reconnect after {attempts} attempts, last error {last}")
            }
            Self::SchemaMismatch(err) => {
                write!(f, "database structure is not up to date: {err}")
            }
            Self::RetryLoop { retries, last } => {
                write!(f, "connection dropped again after {retries} reconnects: {last}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SqlWorkerPoolError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter binding error: {0}")]
    BindingError(String),

    #[error("Statement {0} is not prepared on this connection")]
    Unprepared(u32),

    #[error("Database error {0}")]
    Database(NativeError),

    #[error("Transaction abandoned after retrying deadlocks for {0:?}")]
    DeadlockRetryExhausted(Duration),

    #[error("Fatal database error: {0}")]
    Fatal(FatalReason),

    #[error("Worker pool is closed")]
    PoolClosed,
}

impl SqlWorkerPoolError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Native error code carried by this error, if any.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Database(err) => Some(err.code),
            Self::Fatal(
                FatalReason::ReconnectExhausted { last, .. }
                | FatalReason::RetryLoop { last, .. }
                | FatalReason::SchemaMismatch(last),
            ) => Some(last.code),
            _ => None,
        }
    }

    #[must_use]
    pub fn class(&self) -> Option<ErrorClass> {
        self.code().map(classify)
    }

    #[must_use]
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Self::Database(err) if err.class() == ErrorClass::Deadlock)
    }
}

impl From<NativeError> for SqlWorkerPoolError {
    fn from(err: NativeError) -> Self {
        SqlWorkerPoolError::Database(err)
    }
}
