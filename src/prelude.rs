//! Convenient imports for common functionality.
//!
//! ```rust
//! use sql_worker_pool::prelude::*;
//!
//! let mut registry = StatementRegistry::new();
//! registry
//!     .register(0, "SELECT name FROM realmlist WHERE id = ?", ConnectionFlags::Both)
//!     .unwrap();
//! assert_eq!(registry.len(), 1);
//! ```

pub use crate::callback::{
    HolderCallback, PendingCallback, QueryCallback, QueryCallbackProcessor, TransactionCallback,
};
pub use crate::config::{ConnectionInfo, PoolOptions};
pub use crate::driver::Driver;
pub use crate::error::SqlWorkerPoolError;
pub use crate::fatal::FatalHandler;
pub use crate::future::{FutureStatus, QueryFuture};
pub use crate::holder::SqlQueryHolder;
pub use crate::pool::DatabaseWorkerPool;
pub use crate::results::QueryResult;
pub use crate::statement::{ConnectionFlags, PreparedStatement, StatementRegistry};
pub use crate::transaction::Transaction;
pub use crate::types::RowValues;

#[cfg(feature = "sqlite")]
pub use crate::driver::SqliteDriver;
