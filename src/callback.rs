//! Continuations for asynchronous results, run on the caller's thread when it polls.
//!
//! Nothing here is `Send`: callbacks are created, polled and invoked by the thread that
//! owns the [`QueryCallbackProcessor`], typically once per server tick.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use crate::future::{FutureStatus, QueryFuture};
use crate::holder::SqlQueryHolder;
use crate::results::QueryResult;

/// Anything a [`QueryCallbackProcessor`] can poll.
pub trait PendingCallback {
    /// Run whatever became ready. Returns `true` once the callback is finished and can be
    /// dropped.
    fn invoke_if_ready(&mut self) -> bool;
}

type ChainLink = Box<dyn FnOnce(&mut QueryCallback, Option<QueryResult>)>;

/// A query future plus an ordered chain of continuations.
///
/// Each link consumes one query result, `None` when the query produced no rows or failed.
/// A link may start the next query with [`set_next_query`](Self::set_next_query); the
/// following link then receives that query's result. When a link starts no follow-up
/// query, the rest of the chain is dropped without being invoked.
pub struct QueryCallback {
    future: Option<QueryFuture<Option<QueryResult>>>,
    links: VecDeque<ChainLink>,
}

impl QueryCallback {
    #[must_use]
    pub fn new(future: QueryFuture<Option<QueryResult>>) -> Self {
        Self {
            future: Some(future),
            links: VecDeque::new(),
        }
    }

    /// Append a link that ends the chain's use of its result.
    #[must_use]
    pub fn with_callback(mut self, callback: impl FnOnce(Option<QueryResult>) + 'static) -> Self {
        self.links
            .push_back(Box::new(move |_: &mut QueryCallback, result| callback(result)));
        self
    }

    /// Append a link that may start the next query of the chain.
    #[must_use]
    pub fn with_chaining_callback(
        mut self,
        callback: impl FnOnce(&mut QueryCallback, Option<QueryResult>) + 'static,
    ) -> Self {
        self.links.push_back(Box::new(callback));
        self
    }

    /// Wait on `future` next, replacing the one whose result is being handled.
    pub fn set_next_query(&mut self, future: QueryFuture<Option<QueryResult>>) {
        self.future = Some(future);
    }

    /// Links not yet invoked.
    #[must_use]
    pub fn pending_links(&self) -> usize {
        self.links.len()
    }

    fn abandon(&mut self, why: &str) {
        if !self.links.is_empty() {
            debug!(skipped = self.links.len(), why, "abandoning query callback chain");
        }
        self.links.clear();
        self.future = None;
    }
}

impl PendingCallback for QueryCallback {
    fn invoke_if_ready(&mut self) -> bool {
        loop {
            let Some(future) = self.future.take() else {
                self.abandon("no follow-up query");
                return true;
            };
            match future.wait_for(Duration::ZERO) {
                FutureStatus::Timeout => {
                    self.future = Some(future);
                    return false;
                }
                FutureStatus::Broken => {
                    self.abandon("query was dropped before completing");
                    return true;
                }
                FutureStatus::Ready => {}
            }

            let Some(link) = self.links.pop_front() else {
                return true;
            };
            link(self, future.take().flatten());
            if self.links.is_empty() {
                self.future = None;
                return true;
            }
        }
    }
}

/// Runs a callback once a [`SqlQueryHolder`] has been executed.
pub struct HolderCallback {
    future: QueryFuture<SqlQueryHolder>,
    callback: Option<Box<dyn FnOnce(SqlQueryHolder)>>,
}

impl HolderCallback {
    #[must_use]
    pub fn new(
        future: QueryFuture<SqlQueryHolder>,
        callback: impl FnOnce(SqlQueryHolder) + 'static,
    ) -> Self {
        Self {
            future,
            callback: Some(Box::new(callback)),
        }
    }
}

impl PendingCallback for HolderCallback {
    fn invoke_if_ready(&mut self) -> bool {
        match self.future.wait_for(Duration::ZERO) {
            FutureStatus::Timeout => false,
            FutureStatus::Broken => {
                debug!("query holder was dropped before completing");
                self.callback = None;
                true
            }
            FutureStatus::Ready => {
                if let (Some(holder), Some(callback)) = (self.future.take(), self.callback.take()) {
                    callback(holder);
                }
                true
            }
        }
    }
}

/// Runs a callback with the outcome of an asynchronous commit.
///
/// A commit that never ran (pool closed first) reports `false`.
pub struct TransactionCallback {
    future: QueryFuture<bool>,
    callback: Option<Box<dyn FnOnce(bool)>>,
}

impl TransactionCallback {
    #[must_use]
    pub fn new(future: QueryFuture<bool>) -> Self {
        Self {
            future,
            callback: None,
        }
    }

    #[must_use]
    pub fn after_complete(mut self, callback: impl FnOnce(bool) + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl PendingCallback for TransactionCallback {
    fn invoke_if_ready(&mut self) -> bool {
        let success = match self.future.wait_for(Duration::ZERO) {
            FutureStatus::Timeout => return false,
            FutureStatus::Broken => false,
            FutureStatus::Ready => self.future.take().unwrap_or(false),
        };
        if let Some(callback) = self.callback.take() {
            callback(success);
        }
        true
    }
}

/// Owns pending callbacks and runs the ready ones when asked.
#[derive(Default)]
pub struct QueryCallbackProcessor {
    callbacks: Vec<Box<dyn PendingCallback>>,
}

impl QueryCallbackProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: impl PendingCallback + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Poll every pending callback once. Returns how many finished.
    pub fn process_ready_callbacks(&mut self) -> usize {
        let before = self.callbacks.len();
        self.callbacks.retain_mut(|callback| !callback.invoke_if_ready());
        before - self.callbacks.len()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}
