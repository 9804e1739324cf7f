#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;
use sql_worker_pool::test_utils::FatalRecorder;
use sql_worker_pool::{
    ConnectionFlags, ConnectionInfo, DatabaseWorkerPool, Driver, ErrorClass, FatalReason, RowValues,
    SqlWorkerPoolError, SqliteDriver, StatementRegistry,
};
use tempfile::TempDir;

const INSERT_VALUES: u32 = 1;
const SELECT_VALUES: u32 = 2;
const INSERT_ACCOUNT: u32 = 3;

fn sqlite_info(dir: &TempDir) -> ConnectionInfo {
    ConnectionInfo {
        host: "localhost".into(),
        port_or_socket: "0".into(),
        user: String::new(),
        password: String::new(),
        database: dir.path().join("characters.db").to_string_lossy().into_owned(),
        ssl: false,
    }
}

/// Create the schema up front: statements are prepared against it when the pool starts.
fn create_schema(info: &ConnectionInfo) -> Result<(), SqlWorkerPoolError> {
    let mut session = SqliteDriver.connect(info)?;
    session.execute(
        "CREATE TABLE item_values (
            i INTEGER, u INTEGER, f REAL, t TEXT, b INTEGER,
            ts TEXT, n TEXT, j TEXT, bl BLOB
        );
        CREATE TABLE account (id INTEGER PRIMARY KEY, username TEXT UNIQUE NOT NULL);",
    )?;
    Ok(())
}

fn registry() -> Result<StatementRegistry, SqlWorkerPoolError> {
    let mut registry = StatementRegistry::new();
    registry
        .register(
            INSERT_VALUES,
            "INSERT INTO item_values (i, u, f, t, b, ts, n, j, bl) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ConnectionFlags::Sync,
        )?
        .register(
            SELECT_VALUES,
            "SELECT i, u, f, t, b, ts, n, j, bl FROM item_values WHERE i = ?",
            ConnectionFlags::Both,
        )?
        .register(
            INSERT_ACCOUNT,
            "INSERT INTO account (id, username) VALUES (?, ?)",
            ConnectionFlags::Both,
        )?;
    Ok(registry)
}

fn start_pool(dir: &TempDir) -> Result<(DatabaseWorkerPool, Arc<FatalRecorder>), SqlWorkerPoolError> {
    common::init_tracing();
    let info = sqlite_info(dir);
    create_schema(&info)?;
    let fatal = Arc::new(FatalRecorder::new());
    let mut pool = DatabaseWorkerPool::builder("characters", info, Arc::new(SqliteDriver))
        .options(common::fast_options(1, 1))
        .statements(registry()?)
        .fatal_handler(fatal.clone())
        .build();
    pool.open()?;
    pool.prepare_statements()?;
    Ok((pool, fatal))
}

#[test]
fn bound_values_read_back_unchanged() -> Result<(), SqlWorkerPoolError> {
    let dir = TempDir::new().expect("temp dir");
    let (pool, _fatal) = start_pool(&dir)?;

    let logout = NaiveDate::from_ymd_opt(2024, 3, 9)
        .and_then(|d| d.and_hms_milli_opt(18, 30, 5, 250))
        .expect("valid timestamp");
    let settings = json!({"realm": "Argent Dawn", "flags": [1, 2, 3]});

    let mut insert = pool.get_prepared_statement(INSERT_VALUES)?;
    insert
        .set(0, 42_i64)
        .set(1, 4_000_000_000_u64)
        .set(2, 2.5_f64)
        .set(3, "Thrall")
        .set(4, true)
        .set(5, logout)
        .set_null(6)
        .set(7, settings.clone())
        .set(8, vec![0xde_u8, 0xad, 0xbe, 0xef]);
    pool.execute_prepared(&insert)?;

    let mut select = pool.get_prepared_statement(SELECT_VALUES)?;
    select.set(0, 42_i64);
    let row = pool.query_prepared(&select)?.expect("row was inserted");

    assert_eq!(row.row_count(), 1);
    assert_eq!(row.get_by_name("i").and_then(RowValues::as_int), Some(42));
    assert_eq!(
        row.get_by_name("u").and_then(RowValues::as_uint),
        Some(4_000_000_000)
    );
    assert_eq!(row.get_by_name("f").and_then(RowValues::as_float), Some(2.5));
    assert_eq!(row.get_by_name("t").and_then(RowValues::as_text), Some("Thrall"));
    assert_eq!(row.get_by_name("b").and_then(RowValues::as_bool), Some(true));
    assert_eq!(
        row.get_by_name("ts").and_then(RowValues::as_timestamp),
        Some(logout)
    );
    assert!(row.get_by_name("n").is_some_and(RowValues::is_null));
    assert_eq!(row.get_by_name("j").and_then(RowValues::as_json), Some(settings));
    assert_eq!(
        row.get_by_name("bl").and_then(RowValues::as_blob),
        Some(&[0xde_u8, 0xad, 0xbe, 0xef][..])
    );

    // Largest unsigned value a SQLite integer holds reads back exactly; anything larger is
    // refused instead of coming back as a float.
    let mut edge = pool.get_prepared_statement(INSERT_VALUES)?;
    edge.set(0, 43_i64)
        .set(1, i64::MAX as u64)
        .set(2, 0.0_f64)
        .set(3, "Jaina")
        .set(4, false)
        .set(5, logout)
        .set_null(6)
        .set_null(7)
        .set_null(8);
    pool.execute_prepared(&edge)?;
    select.set(0, 43_i64);
    let row = pool.query_prepared(&select)?.expect("edge row was inserted");
    assert_eq!(
        row.get_by_name("u").and_then(RowValues::as_uint),
        Some(i64::MAX as u64)
    );

    let mut overflow = pool.get_prepared_statement(INSERT_VALUES)?;
    overflow
        .set(0, 44_i64)
        .set(1, u64::MAX)
        .set(2, 0.0_f64)
        .set(3, "Anduin")
        .set(4, false)
        .set(5, logout)
        .set_null(6)
        .set_null(7)
        .set_null(8);
    let err = pool.execute_prepared(&overflow).unwrap_err();
    assert_eq!(err.class(), Some(ErrorClass::Data));
    assert!(!err.is_fatal());
    select.set(0, 44_i64);
    assert!(pool.query_prepared(&select)?.is_none());
    Ok(())
}

#[test]
fn async_prepared_query_sees_sync_writes() -> Result<(), SqlWorkerPoolError> {
    let dir = TempDir::new().expect("temp dir");
    let (pool, _fatal) = start_pool(&dir)?;

    let mut insert = pool.get_prepared_statement(INSERT_ACCOUNT)?;
    insert.set(0, 7_i64).set(1, "jaina");
    pool.execute_prepared(&insert)?;

    let mut raw = pool
        .async_query("SELECT username FROM account WHERE id = 7")
        .get()
        .flatten()
        .expect("account row");
    assert_eq!(raw.get(0).and_then(RowValues::as_text), Some("jaina"));
    assert!(!raw.next_row());
    Ok(())
}

#[test]
fn empty_results_are_reported_as_none() -> Result<(), SqlWorkerPoolError> {
    let dir = TempDir::new().expect("temp dir");
    let (pool, _fatal) = start_pool(&dir)?;

    assert!(pool.query("SELECT id FROM account WHERE id = -1")?.is_none());

    let mut select = pool.get_prepared_statement(SELECT_VALUES)?;
    select.set(0, 12345_i64);
    assert!(pool.query_prepared(&select)?.is_none());

    let future = pool.async_query_prepared(select);
    assert!(matches!(future.get(), Some(None)));
    Ok(())
}

#[test]
fn binding_mismatches_fail_before_reaching_the_database() -> Result<(), SqlWorkerPoolError> {
    let dir = TempDir::new().expect("temp dir");
    let (pool, fatal) = start_pool(&dir)?;

    let mut partial = pool.get_prepared_statement(INSERT_ACCOUNT)?;
    partial.set(0, 1_i64);
    assert!(matches!(
        pool.execute_prepared(&partial),
        Err(SqlWorkerPoolError::BindingError(_))
    ));

    let mut too_many = pool.get_prepared_statement(INSERT_ACCOUNT)?;
    too_many.set(0, 1_i64).set(1, "anduin").set(2, "extra");
    assert!(matches!(
        pool.execute_prepared(&too_many),
        Err(SqlWorkerPoolError::BindingError(_))
    ));

    assert!(!pool.async_execute_prepared(partial).get().unwrap_or(true));
    assert!(pool.query("SELECT id FROM account")?.is_none());
    assert_eq!(fatal.calls(), 0);
    Ok(())
}

#[test]
fn duplicate_keys_are_data_errors_and_missing_tables_are_fatal() -> Result<(), SqlWorkerPoolError> {
    let dir = TempDir::new().expect("temp dir");
    let (pool, fatal) = start_pool(&dir)?;

    pool.execute("INSERT INTO account (id, username) VALUES (1, 'sylvanas')")?;
    let dup = pool
        .execute("INSERT INTO account (id, username) VALUES (2, 'sylvanas')")
        .unwrap_err();
    assert_eq!(dup.code(), Some(1062));
    assert!(!dup.is_fatal());
    assert_eq!(fatal.calls(), 0);

    let missing = pool.query("SELECT * FROM guild_bank").unwrap_err();
    assert!(matches!(
        missing,
        SqlWorkerPoolError::Fatal(FatalReason::SchemaMismatch(_))
    ));
    assert_eq!(fatal.calls(), 1);

    // The pool keeps serving after a reported fatal error.
    assert!(pool.query("SELECT username FROM account")?.is_some());
    Ok(())
}

#[test]
fn escaping_and_server_details_use_the_session() -> Result<(), SqlWorkerPoolError> {
    let dir = TempDir::new().expect("temp dir");
    let (pool, _fatal) = start_pool(&dir)?;

    let escaped = pool.escape_string("Mal'Ganis")?;
    assert_eq!(escaped, "Mal''Ganis");
    pool.execute(&format!(
        "INSERT INTO account (id, username) VALUES (3, '{escaped}')"
    ))?;
    let row = pool
        .query("SELECT username FROM account WHERE id = 3")?
        .expect("escaped insert");
    assert_eq!(row.get(0).and_then(RowValues::as_text), Some("Mal'Ganis"));

    assert_eq!(pool.escape_string("")?, "");
    assert!(pool.server_version().is_some_and(|v| v.starts_with("SQLite")));

    pool.keep_alive();
    let marker = pool.async_execute("SELECT 1");
    assert_eq!(marker.wait_for(Duration::from_secs(5)), sql_worker_pool::FutureStatus::Ready);
    Ok(())
}
