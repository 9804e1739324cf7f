//! Scriptable in-memory driver.
//!
//! Every session a [`MockDriver`] hands out shares one state: which statements have become
//! visible (committed), which calls should fail, and counters for connects, pings, commits
//! and rollbacks. Statements run inside a transaction only become visible on `COMMIT`; a
//! rollback or a dropped session discards them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::ConnectionInfo;
use crate::driver::{Driver, NativeConnection, error_codes};
use crate::error::NativeError;
use crate::results::ResultSet;
use crate::types::RowValues;

#[derive(Debug)]
struct FailureRule {
    pattern: String,
    code: u32,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct MockState {
    connects: u32,
    failing_connects: u32,
    next_session: u32,
    rules: Vec<FailureRule>,
    empty_patterns: Vec<String>,
    prepare_counts: HashMap<u32, usize>,
    latency: Duration,
    executed: Vec<String>,
    committed: Vec<String>,
    commits: u32,
    rollbacks: u32,
    pings: u32,
}

impl MockState {
    fn check(&mut self, text: &str) -> Result<(), NativeError> {
        let rule = self.rules.iter_mut().find(|rule| {
            text.contains(rule.pattern.as_str()) && rule.remaining.is_none_or(|left| left > 0)
        });
        match rule {
            Some(rule) => {
                if let Some(left) = rule.remaining.as_mut() {
                    *left -= 1;
                }
                Err(NativeError::new(
                    rule.code,
                    format!("injected failure for '{text}'"),
                ))
            }
            None => Ok(()),
        }
    }
}

/// In-memory [`Driver`] with failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Make the next `count` connects fail with a connection error.
    pub fn fail_connects(&self, count: u32) {
        self.state().failing_connects = count;
    }

    /// Fail the next `times` statements whose text contains `pattern` with `code`.
    ///
    /// Transactions can be targeted through `START TRANSACTION` and `COMMIT`, keep-alive
    /// through `PING`.
    pub fn fail_matching(&self, pattern: &str, code: u32, times: u32) {
        self.state().rules.push(FailureRule {
            pattern: pattern.to_owned(),
            code,
            remaining: Some(times),
        });
    }

    /// Fail every statement containing `pattern` with `code`.
    pub fn fail_matching_always(&self, pattern: &str, code: u32) {
        self.state().rules.push(FailureRule {
            pattern: pattern.to_owned(),
            code,
            remaining: None,
        });
    }

    /// Queries containing `pattern` return no rows.
    pub fn empty_result_for(&self, pattern: &str) {
        self.state().empty_patterns.push(pattern.to_owned());
    }

    /// Report `count` placeholders when preparing statement `id`, whatever its text says.
    pub fn override_prepare_count(&self, id: u32, count: usize) {
        self.state().prepare_counts.insert(id, count);
    }

    /// Sleep this long in every statement.
    pub fn with_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    #[must_use]
    pub fn connects(&self) -> u32 {
        self.state().connects
    }

    /// Every statement that ran successfully, in order, committed or not.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Statements whose effects are visible: run outside a transaction, or committed.
    #[must_use]
    pub fn committed(&self) -> Vec<String> {
        self.state().committed.clone()
    }

    #[must_use]
    pub fn commits(&self) -> u32 {
        self.state().commits
    }

    #[must_use]
    pub fn rollbacks(&self) -> u32 {
        self.state().rollbacks
    }

    #[must_use]
    pub fn pings(&self) -> u32 {
        self.state().pings
    }
}

impl Driver for MockDriver {
    fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn NativeConnection>, NativeError> {
        let mut state = self.state();
        state.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(NativeError::new(
                error_codes::CR_CONN_HOST_ERROR,
                format!("can't connect to server on '{}'", info.host),
            ));
        }
        state.next_session += 1;
        Ok(Box::new(MockSession {
            id: state.next_session,
            state: Arc::clone(&self.state),
            prepared: HashMap::new(),
            pending: None,
        }))
    }
}

struct MockSession {
    id: u32,
    state: Arc<Mutex<MockState>>,
    prepared: HashMap<u32, String>,
    /// Statements of the open transaction, if any.
    pending: Option<Vec<String>>,
}

impl MockSession {
    /// Apply one statement: fail it if a rule says so, otherwise record it.
    fn run(&mut self, text: &str) -> Result<(), NativeError> {
        let latency = {
            let mut state = lock(&self.state);
            state.check(text)?;
            state.executed.push(text.to_owned());
            if self.pending.is_none() {
                state.committed.push(text.to_owned());
            }
            state.latency
        };
        if let Some(pending) = self.pending.as_mut() {
            pending.push(text.to_owned());
        }
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        Ok(())
    }

    fn rows_for(&self, text: &str, row: Vec<RowValues>) -> ResultSet {
        let state = lock(&self.state);
        if state
            .empty_patterns
            .iter()
            .any(|pattern| text.contains(pattern.as_str()))
        {
            return ResultSet::from_rows(vec!["echo"], Vec::new());
        }
        let columns: Vec<String> = (0..row.len()).map(|i| format!("c{i}")).collect();
        ResultSet::from_rows(columns, vec![row])
    }

    fn bound_text(&self, index: u32, params: &[RowValues]) -> Result<String, NativeError> {
        let sql = self.prepared.get(&index).ok_or_else(|| {
            NativeError::new(
                error_codes::ER_UNKNOWN_ERROR,
                format!("statement {index} not prepared on session {}", self.id),
            )
        })?;
        let expected = sql.matches('?').count();
        if params.len() != expected {
            return Err(NativeError::new(
                error_codes::ER_WRONG_VALUE_COUNT,
                format!("statement {index} takes {expected} values, got {}", params.len()),
            ));
        }
        Ok(format!("{sql} {params:?}"))
    }
}

impl NativeConnection for MockSession {
    fn execute(&mut self, sql: &str) -> Result<u64, NativeError> {
        self.run(sql)?;
        Ok(1)
    }

    /// Echoes the statement text back as a one-column row.
    fn query(&mut self, sql: &str) -> Result<ResultSet, NativeError> {
        self.run(sql)?;
        Ok(self.rows_for(sql, vec![RowValues::Text(sql.to_owned())]))
    }

    fn prepare(&mut self, index: u32, sql: &str) -> Result<usize, NativeError> {
        let count = {
            let mut state = lock(&self.state);
            state.check(&format!("PREPARE {sql}"))?;
            state
                .prepare_counts
                .get(&index)
                .copied()
                .unwrap_or_else(|| sql.matches('?').count())
        };
        self.prepared.insert(index, sql.to_owned());
        Ok(count)
    }

    fn execute_prepared(&mut self, index: u32, params: &[RowValues]) -> Result<u64, NativeError> {
        let text = self.bound_text(index, params)?;
        self.run(&text)?;
        Ok(1)
    }

    /// Echoes the bound values back as one row, one column per value.
    fn query_prepared(&mut self, index: u32, params: &[RowValues]) -> Result<ResultSet, NativeError> {
        let text = self.bound_text(index, params)?;
        self.run(&text)?;
        let row = if params.is_empty() {
            vec![RowValues::Text(text.clone())]
        } else {
            params.to_vec()
        };
        Ok(self.rows_for(&text, row))
    }

    fn escape(&self, input: &str) -> String {
        input.replace('\\', "\\\\").replace('\'', "\\'")
    }

    fn ping(&mut self) -> Result<(), NativeError> {
        let mut state = lock(&self.state);
        state.check("PING")?;
        state.pings += 1;
        Ok(())
    }

    fn server_version(&self) -> String {
        "8.0.36-mock".to_owned()
    }

    fn begin(&mut self) -> Result<(), NativeError> {
        lock(&self.state).check("START TRANSACTION")?;
        self.pending = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), NativeError> {
        let mut state = lock(&self.state);
        state.check("COMMIT")?;
        if let Some(pending) = self.pending.take() {
            state.committed.extend(pending);
            state.commits += 1;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), NativeError> {
        let mut state = lock(&self.state);
        if self.pending.take().is_some() {
            state.rollbacks += 1;
        }
        Ok(())
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
