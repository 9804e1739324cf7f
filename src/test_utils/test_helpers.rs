//! Helper utilities for testing and development.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ConnectionInfo;
use crate::error::SqlWorkerPoolError;
use crate::fatal::FatalHandler;
use crate::results::{QueryResult, ResultSet};
use crate::types::RowValues;

/// Connection details for tests that never reach a real server.
#[must_use]
pub fn test_connection_info() -> ConnectionInfo {
    ConnectionInfo {
        host: "127.0.0.1".into(),
        port_or_socket: "3306".into(),
        user: "trinity".into(),
        password: "trinity".into(),
        database: "world".into(),
        ssl: false,
    }
}

/// Create a cursor over the given rows. `None` if `rows` is empty.
#[must_use]
pub fn create_test_result(column_names: Vec<&str>, rows: Vec<Vec<RowValues>>) -> Option<QueryResult> {
    QueryResult::from_result_set(ResultSet::from_rows(column_names, rows))
}

/// Fatal handler that records instead of exiting.
#[derive(Debug, Default)]
pub struct FatalRecorder {
    calls: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl FatalRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl FatalHandler for FatalRecorder {
    fn on_fatal(&self, error: &SqlWorkerPoolError) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(error.to_string());
    }
}
