//! Thread-backed database access for game servers.
//!
//! A [`DatabaseWorkerPool`] runs ad-hoc and prepared SQL either on the calling thread
//! (synchronous connections, borrowed round-robin) or on dedicated worker threads
//! (asynchronous connections, fed from a shared queue, results delivered through
//! [`QueryFuture`]). Lost sessions reconnect on their own, deadlocked transactions are
//! retried for a bounded time, and unrecoverable states are handed to a [`FatalHandler`].

mod connection;
mod holder;
mod operation;
mod pool;
mod transaction;
mod worker;

pub mod callback;
pub mod config;
pub mod driver;
pub mod error;
pub mod fatal;
pub mod future;
pub mod prelude;
pub mod queue;
pub mod results;
pub mod statement;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use callback::{
    HolderCallback, PendingCallback, QueryCallback, QueryCallbackProcessor, TransactionCallback,
};
pub use config::{ConnectionInfo, PoolOptions, ReconnectPolicy};
pub use connection::{Connection, ConnectionStats};
pub use driver::{Driver, NativeConnection};
pub use error::{ErrorClass, FatalReason, NativeError, SqlWorkerPoolError};
pub use fatal::{ExitProcess, FatalHandler};
pub use future::{FutureStatus, Promise, QueryFuture};
pub use holder::SqlQueryHolder;
pub use pool::{DatabaseWorkerPool, DatabaseWorkerPoolBuilder};
pub use queue::ProducerConsumerQueue;
pub use results::{QueryResult, ResultSet};
pub use statement::{
    ConnectionFlags, ConnectionKind, PreparedStatement, StatementRegistry, StatementTemplate,
};
pub use transaction::{Transaction, TransactionElement};
pub use types::RowValues;

#[cfg(feature = "sqlite")]
pub use driver::SqliteDriver;
