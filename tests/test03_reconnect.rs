mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockPool, fast_options, mock_pool, wait_until};
use sql_worker_pool::driver::error_codes;
use sql_worker_pool::test_utils::{MockDriver, test_connection_info};
use sql_worker_pool::{
    Connection, ConnectionFlags, ConnectionKind, ConnectionStats, FatalReason, FutureStatus,
    ReconnectPolicy, RowValues, SqlWorkerPoolError, StatementRegistry,
};

const SAVE_CHARACTER: u32 = 1;

fn registry() -> Arc<StatementRegistry> {
    let mut registry = StatementRegistry::new();
    registry
        .register(
            SAVE_CHARACTER,
            "UPDATE characters SET position_x = ? WHERE guid = ?",
            ConnectionFlags::Both,
        )
        .expect("valid registry");
    Arc::new(registry)
}

fn open_connection(driver: &MockDriver) -> Connection {
    let mut conn = Connection::new(
        test_connection_info(),
        ConnectionKind::Sync,
        Arc::new(driver.clone()),
        registry(),
        ReconnectPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(1),
        },
    );
    conn.open().expect("initial connect");
    conn.prepare_statements().expect("prepare");
    conn
}

#[test]
fn lost_session_recovers_after_four_failed_attempts() -> Result<(), SqlWorkerPoolError> {
    common::init_tracing();
    let driver = MockDriver::new();
    let mut conn = open_connection(&driver);

    driver.fail_matching("SELECT online", error_codes::CR_SERVER_GONE_ERROR, 1);
    driver.fail_connects(4);

    let row = conn
        .query("SELECT online FROM characters WHERE guid = 1")?
        .expect("query retried on the new session");
    assert_eq!(
        row.get(0).and_then(RowValues::as_text),
        Some("SELECT online FROM characters WHERE guid = 1")
    );
    assert_eq!(
        conn.stats(),
        ConnectionStats {
            reconnects: 1,
            failed_reconnect_attempts: 4,
        }
    );
    assert_eq!(driver.connects(), 6);
    assert!(!conn.is_reconnecting());
    Ok(())
}

#[test]
fn reconnect_prepares_statements_again() -> Result<(), SqlWorkerPoolError> {
    let driver = MockDriver::new();
    let mut conn = open_connection(&driver);
    driver.fail_matching("UPDATE characters", error_codes::CR_SERVER_LOST, 1);

    let stmt = sql_worker_pool::PreparedStatement::new(Arc::clone(
        registry().get(SAVE_CHARACTER).expect("registered"),
    ))
    .with_params(vec![RowValues::Float(-8913.2), RowValues::UInt(1)]);
    assert_eq!(conn.execute_prepared(&stmt)?, 1);
    assert_eq!(conn.stats().reconnects, 1);
    assert!(conn.is_prepared(SAVE_CHARACTER));
    assert_eq!(driver.committed().len(), 1);
    Ok(())
}

#[test]
fn exhausted_reconnects_are_fatal_exactly_once() {
    let MockPool {
        pool,
        driver,
        fatal,
    } = mock_pool(fast_options(1, 1), StatementRegistry::new());

    driver.fail_matching("SELECT realm", error_codes::CR_SERVER_LOST, 1);
    driver.fail_connects(5);

    let err = pool.query("SELECT realm FROM realmlist").unwrap_err();
    assert!(matches!(
        err,
        SqlWorkerPoolError::Fatal(FatalReason::ReconnectExhausted { attempts: 5, .. })
    ));
    assert_eq!(fatal.calls(), 1);
    assert_eq!(driver.connects(), 2 + 5);
}

#[test]
fn worker_reports_fatal_errors_to_the_handler() {
    let MockPool {
        pool,
        driver,
        fatal,
    } = mock_pool(fast_options(1, 1), StatementRegistry::new());

    driver.fail_matching("SELECT gm", error_codes::CR_SERVER_GONE_ERROR, 1);
    driver.fail_connects(5);

    let future = pool.async_query("SELECT gm FROM account_access");
    assert_eq!(future.wait(), FutureStatus::Broken);
    assert!(wait_until(Duration::from_secs(5), || fatal.calls() == 1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(fatal.calls(), 1);
    assert!(fatal.messages()[0].contains("reconnect"));
}

#[test]
fn session_dropping_after_every_reconnect_is_a_retry_loop() {
    let MockPool {
        pool,
        driver,
        fatal,
    } = mock_pool(fast_options(1, 1), StatementRegistry::new());
    driver.fail_matching_always("SELECT flapping", error_codes::CR_SERVER_LOST_EXTENDED);

    let err = pool.query("SELECT flapping FROM t").unwrap_err();
    assert!(matches!(
        err,
        SqlWorkerPoolError::Fatal(FatalReason::RetryLoop { retries: 5, .. })
    ));
    assert_eq!(fatal.calls(), 1);
}

#[test]
fn data_and_schema_errors_are_not_retried() {
    let MockPool {
        pool,
        driver,
        fatal,
    } = mock_pool(fast_options(1, 1), StatementRegistry::new());
    driver.fail_matching("INSERT INTO account", error_codes::ER_DUP_ENTRY, 1);
    driver.fail_matching("SELECT mail", error_codes::ER_BAD_FIELD_ERROR, 1);
    let connects_before = driver.connects();

    let dup = pool
        .execute("INSERT INTO account (username) VALUES ('thrall')")
        .unwrap_err();
    assert_eq!(dup.code(), Some(error_codes::ER_DUP_ENTRY));
    assert_eq!(fatal.calls(), 0);

    let schema = pool.query("SELECT mail FROM account").unwrap_err();
    assert!(matches!(
        schema,
        SqlWorkerPoolError::Fatal(FatalReason::SchemaMismatch(_))
    ));
    assert_eq!(fatal.calls(), 1);
    assert_eq!(driver.connects(), connects_before);
}
