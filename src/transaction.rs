//! Ordered statement batches committed atomically, with time-boxed deadlock retry.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::error::{ErrorClass, FatalReason, NativeError, SqlWorkerPoolError};
use crate::statement::PreparedStatement;

/// Only one transaction retries after a deadlock at a time, process-wide.
static DEADLOCK_RETRY_LOCK: Mutex<()> = Mutex::new(());

/// One statement of a [`Transaction`].
#[derive(Debug, Clone)]
pub enum TransactionElement {
    Raw(String),
    Prepared(PreparedStatement),
}

/// Statements run in append order by one connection, committed only if all succeed.
#[derive(Debug, Default)]
pub struct Transaction {
    elements: Vec<TransactionElement>,
    cleaned_up: bool,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, sql: impl Into<String>) -> &mut Self {
        self.elements.push(TransactionElement::Raw(sql.into()));
        self
    }

    pub fn append_prepared(&mut self, stmt: PreparedStatement) -> &mut Self {
        self.elements.push(TransactionElement::Prepared(stmt));
        self
    }

    #[must_use]
    pub fn elements(&self) -> &[TransactionElement] {
        &self.elements
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Whether the transaction has been committed or abandoned.
    #[must_use]
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// Drop the accumulated elements. Runs once; later calls do nothing.
    pub(crate) fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.elements.clear();
        self.cleaned_up = true;
    }
}

/// Run `tx` on `conn`, retrying the whole transaction after deadlocks until `budget` runs
/// out. The transaction is cleaned up whatever the outcome.
///
/// # Errors
/// The first non-deadlock failure, or `DeadlockRetryExhausted` once the budget is spent.
pub(crate) fn commit_with_deadlock_retry(
    conn: &mut Connection,
    tx: &mut Transaction,
    budget: Duration,
) -> Result<(), SqlWorkerPoolError> {
    let result = run_with_deadlock_retry(conn, tx, budget);
    tx.cleanup();
    result
}

fn run_with_deadlock_retry(
    conn: &mut Connection,
    tx: &Transaction,
    budget: Duration,
) -> Result<(), SqlWorkerPoolError> {
    match run_once(conn, tx) {
        Err(err) if err.is_deadlock() => {
            debug!(error = %err, "transaction deadlocked, retrying");
        }
        other => return other,
    }

    let _serialised = DEADLOCK_RETRY_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let started = Instant::now();
    let mut attempt: u32 = 1;
    while started.elapsed() < budget {
        match run_once(conn, tx) {
            Err(err) if err.is_deadlock() => {
                warn!(
                    attempt,
                    elapsed_ms = started.elapsed().as_millis(),
                    error = %err,
                    "deadlocked transaction retry failed"
                );
                attempt += 1;
            }
            other => return other,
        }
    }

    error!(
        attempts = attempt,
        budget_ms = budget.as_millis(),
        "giving up on deadlocked transaction"
    );
    Err(SqlWorkerPoolError::DeadlockRetryExhausted(budget))
}

/// One full attempt. A session lost halfway took the earlier statements with it, so the
/// attempt starts over on the reconnected session.
fn run_once(conn: &mut Connection, tx: &Transaction) -> Result<(), SqlWorkerPoolError> {
    let limit = conn.reconnect_policy().attempts;
    let mut restarts = 0;
    loop {
        match conn.execute_transaction(tx) {
            Err(SqlWorkerPoolError::Database(err)) if err.class() == ErrorClass::ConnectionLost => {
                if restarts >= limit {
                    return Err(retry_loop(restarts, err));
                }
                restarts += 1;
                debug!(restarts, "restarting transaction on reconnected session");
            }
            other => return other,
        }
    }
}

fn retry_loop(retries: u32, last: NativeError) -> SqlWorkerPoolError {
    error!(retries, error = %last, "transaction keeps losing its session");
    SqlWorkerPoolError::Fatal(FatalReason::RetryLoop { retries, last })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{ConnectionInfo, ReconnectPolicy};
    use crate::driver::error_codes;
    use crate::statement::{ConnectionKind, StatementRegistry};
    use crate::test_utils::MockDriver;

    fn connection(driver: &MockDriver) -> Connection {
        let info: ConnectionInfo = "127.0.0.1;3306;trinity;trinity;characters"
            .parse()
            .unwrap();
        let mut conn = Connection::new(
            info,
            ConnectionKind::Sync,
            Arc::new(driver.clone()),
            Arc::new(StatementRegistry::new()),
            ReconnectPolicy {
                attempts: 5,
                base_delay: Duration::from_millis(1),
            },
        );
        conn.open().unwrap();
        conn
    }

    fn two_step() -> Transaction {
        let mut tx = Transaction::new();
        tx.append("UPDATE characters SET money = 10 WHERE guid = 1")
            .append("UPDATE characters SET money = 20 WHERE guid = 2");
        tx
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut tx = two_step();
        assert_eq!(tx.len(), 2);
        tx.cleanup();
        tx.cleanup();
        assert!(tx.is_empty());
        assert!(tx.is_cleaned_up());
    }

    #[test]
    fn deadlocks_are_retried_until_the_transaction_commits() {
        let driver = MockDriver::new();
        driver.fail_matching("guid = 2", error_codes::ER_LOCK_DEADLOCK, 3);
        let mut conn = connection(&driver);
        let mut tx = two_step();

        commit_with_deadlock_retry(&mut conn, &mut tx, Duration::from_secs(5)).unwrap();

        assert!(tx.is_empty());
        assert_eq!(driver.rollbacks(), 3);
        assert_eq!(driver.commits(), 1);
        assert_eq!(driver.committed().len(), 2);
    }

    #[test]
    fn retry_budget_bounds_the_time_spent_and_cleans_up() {
        let driver = MockDriver::new();
        driver.fail_matching_always("guid = 1", error_codes::ER_LOCK_DEADLOCK);
        let mut conn = connection(&driver);
        let mut tx = two_step();
        let budget = Duration::from_millis(100);

        let started = Instant::now();
        let err = commit_with_deadlock_retry(&mut conn, &mut tx, budget).unwrap_err();

        assert!(matches!(err, SqlWorkerPoolError::DeadlockRetryExhausted(b) if b == budget));
        assert!(started.elapsed() < budget + Duration::from_secs(2));
        assert!(tx.is_empty());
        assert!(driver.committed().is_empty());
    }

    #[test]
    fn non_deadlock_failures_are_not_retried() {
        let driver = MockDriver::new();
        driver.fail_matching("guid = 2", error_codes::ER_DUP_ENTRY, 1);
        let mut conn = connection(&driver);
        let mut tx = two_step();

        let err = commit_with_deadlock_retry(&mut conn, &mut tx, Duration::from_secs(5))
            .unwrap_err();

        assert_eq!(err.code(), Some(error_codes::ER_DUP_ENTRY));
        assert_eq!(driver.rollbacks(), 1);
        assert!(driver.committed().is_empty());
        assert!(tx.is_cleaned_up());
    }

    #[test]
    fn lost_session_restarts_the_whole_transaction() {
        let driver = MockDriver::new();
        driver.fail_matching("guid = 2", error_codes::CR_SERVER_LOST, 1);
        let mut conn = connection(&driver);
        let mut tx = two_step();

        commit_with_deadlock_retry(&mut conn, &mut tx, Duration::from_secs(5)).unwrap();

        let committed = driver.committed();
        assert_eq!(committed.len(), 2);
        assert!(committed[0].contains("guid = 1"));
        assert!(committed[1].contains("guid = 2"));
        assert_eq!(conn.stats().reconnects, 1);
    }
}
