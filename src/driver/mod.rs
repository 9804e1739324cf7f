//! Boundary to the native client library.
//!
//! A [`Driver`] opens sessions; a [`NativeConnection`] is one open session. The engine
//! only ever talks to the database through these two traits, and only ever interprets
//! failures through the numeric code in [`NativeError`].

#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::config::ConnectionInfo;
use crate::error::NativeError;
use crate::results::ResultSet;
use crate::types::RowValues;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

/// Server error numbers the engine reacts to. Numbering follows the MySQL client/server.
pub mod error_codes {
    pub const ER_DUP_ENTRY: u32 = 1062;
    pub const ER_BAD_FIELD_ERROR: u32 = 1054;
    pub const ER_PARSE_ERROR: u32 = 1064;
    pub const ER_UNKNOWN_ERROR: u32 = 1105;
    pub const ER_WRONG_VALUE_COUNT: u32 = 1136;
    pub const ER_NO_SUCH_TABLE: u32 = 1146;
    pub const ER_LOCK_DEADLOCK: u32 = 1213;
    pub const ER_DATA_OUT_OF_RANGE: u32 = 1264;
    pub const CR_CONN_HOST_ERROR: u32 = 2003;
    pub const CR_SERVER_GONE_ERROR: u32 = 2006;
    pub const CR_SERVER_LOST: u32 = 2013;
    pub const CR_SERVER_LOST_EXTENDED: u32 = 2055;
}

/// Factory for native sessions.
pub trait Driver: Send + Sync {
    /// Open a session, with character set and autocommit configured.
    ///
    /// # Errors
    /// Returns the native error if the server cannot be reached or refuses the login.
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn NativeConnection>, NativeError>;
}

/// One open database session.
///
/// Prepared statements are session-scoped: they are addressed by the pool-wide template id
/// and vanish when the session is dropped.
pub trait NativeConnection: Send {
    /// Run one statement, returning the affected row count.
    fn execute(&mut self, sql: &str) -> Result<u64, NativeError>;

    /// Run one statement and materialise its rows.
    fn query(&mut self, sql: &str) -> Result<ResultSet, NativeError>;

    /// Prepare `sql` under `index`, returning the number of placeholders the server saw.
    fn prepare(&mut self, index: u32, sql: &str) -> Result<usize, NativeError>;

    fn execute_prepared(&mut self, index: u32, params: &[RowValues]) -> Result<u64, NativeError>;

    fn query_prepared(&mut self, index: u32, params: &[RowValues])
    -> Result<ResultSet, NativeError>;

    /// Escape `input` for inclusion inside a quoted string literal.
    fn escape(&self, input: &str) -> String;

    fn ping(&mut self) -> Result<(), NativeError>;

    fn server_version(&self) -> String;

    fn begin(&mut self) -> Result<(), NativeError> {
        self.execute("START TRANSACTION").map(|_| ())
    }

    fn commit(&mut self) -> Result<(), NativeError> {
        self.execute("COMMIT").map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), NativeError> {
        self.execute("ROLLBACK").map(|_| ())
    }
}
