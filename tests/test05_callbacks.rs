mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use common::{MockPool, fast_options, mock_pool, wait_until};
use sql_worker_pool::{
    ConnectionFlags, DatabaseWorkerPool, HolderCallback, PendingCallback, QueryCallback,
    QueryCallbackProcessor, QueryFuture, QueryResult, RowValues, SqlQueryHolder, StatementRegistry,
};

const SELECT_ACCOUNT: u32 = 4;

/// First column of the first row, or `"<none>"` for an empty result.
fn text(result: Option<&QueryResult>) -> String {
    result
        .and_then(|r| r.get(0))
        .and_then(RowValues::as_text)
        .unwrap_or("<none>")
        .to_owned()
}

fn drain(processor: &mut QueryCallbackProcessor) -> bool {
    wait_until(Duration::from_secs(5), || {
        processor.process_ready_callbacks();
        processor.is_empty()
    })
}

/// Login-style chain: account -> characters -> character data, each query issued by the
/// previous link.
fn login_chain(pool: &Rc<DatabaseWorkerPool>, seen: &Rc<RefCell<Vec<String>>>) -> QueryCallback {
    let (pool1, pool2) = (Rc::clone(pool), Rc::clone(pool));
    let (seen1, seen2, seen3) = (Rc::clone(seen), Rc::clone(seen), Rc::clone(seen));

    QueryCallback::new(pool.async_query("SELECT id FROM account WHERE username = 'arthas'"))
        .with_chaining_callback(move |chain, result| {
            seen1.borrow_mut().push(text(result.as_ref()));
            chain.set_next_query(pool1.async_query("SELECT guid FROM characters WHERE account = 1"));
        })
        .with_chaining_callback(move |chain, result| {
            seen2.borrow_mut().push(text(result.as_ref()));
            chain.set_next_query(pool2.async_query("SELECT data FROM character_data WHERE guid = 5"));
        })
        .with_callback(move |result| seen3.borrow_mut().push(text(result.as_ref())))
}

#[test]
fn chained_links_run_in_order() {
    common::init_tracing();
    let MockPool { pool, .. } = mock_pool(fast_options(2, 1), StatementRegistry::new());
    let pool = Rc::new(pool);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let mut processor = QueryCallbackProcessor::new();
    processor.add_callback(login_chain(&pool, &seen));
    assert!(drain(&mut processor));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].contains("FROM account"));
    assert!(seen[1].contains("FROM characters"));
    assert!(seen[2].contains("FROM character_data"));
}

#[test]
fn empty_result_is_handed_to_its_link_and_later_links_are_dropped() {
    let MockPool { pool, driver, .. } = mock_pool(fast_options(1, 1), StatementRegistry::new());
    driver.empty_result_for("FROM character_data");
    let pool = Rc::new(pool);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let after = Rc::new(RefCell::new(0));
    let (pool1, pool2) = (Rc::clone(&pool), Rc::clone(&pool));
    let (seen1, seen2, seen3) = (Rc::clone(&seen), Rc::clone(&seen), Rc::clone(&seen));
    let sink = Rc::clone(&after);

    let mut callback = QueryCallback::new(pool.async_query("SELECT id FROM account WHERE id = 1"))
        .with_chaining_callback(move |chain, result| {
            seen1.borrow_mut().push(text(result.as_ref()));
            chain.set_next_query(pool1.async_query("SELECT guid FROM characters WHERE account = 1"));
        })
        .with_chaining_callback(move |chain, result| {
            seen2.borrow_mut().push(text(result.as_ref()));
            chain.set_next_query(pool2.async_query("SELECT data FROM character_data WHERE guid = 5"));
        })
        .with_chaining_callback(move |chain, result| {
            // Nothing to load: stop here instead of issuing the next query.
            seen3.borrow_mut().push(text(result.as_ref()));
            if let Some(rows) = result {
                chain.set_next_query(QueryFuture::ready_with(Some(rows)));
            }
        })
        .with_callback(move |_| *sink.borrow_mut() += 1);

    assert!(wait_until(Duration::from_secs(5), || callback.invoke_if_ready()));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    assert!(seen[1].contains("FROM characters"));
    assert_eq!(seen[2], "<none>");
    assert_eq!(*after.borrow(), 0);
    assert_eq!(callback.pending_links(), 0);
}

#[test]
fn single_link_sees_a_missing_row() {
    let MockPool { pool, driver, .. } = mock_pool(fast_options(1, 1), StatementRegistry::new());
    driver.empty_result_for("username = 'nobody'");
    let outcome = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&outcome);

    let mut processor = QueryCallbackProcessor::new();
    processor.add_callback(
        QueryCallback::new(pool.async_query("SELECT id FROM account WHERE username = 'nobody'"))
            .with_callback(move |result| *sink.borrow_mut() = Some(result.is_none())),
    );

    assert!(drain(&mut processor));
    assert_eq!(*outcome.borrow(), Some(true));
}

#[test]
fn chain_ends_when_a_link_starts_no_follow_up() {
    let MockPool { pool, .. } = mock_pool(fast_options(1, 1), StatementRegistry::new());
    let calls = Rc::new(RefCell::new(0));
    let (first, second) = (Rc::clone(&calls), Rc::clone(&calls));

    let mut callback = QueryCallback::new(pool.async_query("SELECT 1"))
        .with_chaining_callback(move |_, _| *first.borrow_mut() += 1)
        .with_callback(move |_| *second.borrow_mut() += 1);

    assert!(wait_until(Duration::from_secs(5), || callback.invoke_if_ready()));
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn holder_callback_receives_the_filled_holder() {
    let mut registry = StatementRegistry::new();
    registry
        .register(
            SELECT_ACCOUNT,
            "SELECT username FROM account WHERE id = ?",
            ConnectionFlags::Async,
        )
        .expect("valid registry");
    let MockPool { pool, .. } = mock_pool(fast_options(1, 1), registry);

    let mut holder = SqlQueryHolder::with_size(1);
    let mut stmt = pool
        .get_prepared_statement(SELECT_ACCOUNT)
        .expect("registered");
    stmt.set(0, 3_u32);
    holder.set_prepared_query(0, stmt);

    let loaded = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&loaded);
    let mut processor = QueryCallbackProcessor::new();
    processor.add_callback(HolderCallback::new(
        pool.delay_query_holder(holder),
        move |holder| {
            let id = holder
                .get_prepared_result(0)
                .and_then(|r| r.get(0))
                .and_then(RowValues::as_uint);
            *sink.borrow_mut() = id;
        },
    ));

    assert!(drain(&mut processor));
    assert_eq!(*loaded.borrow(), Some(3));
}
