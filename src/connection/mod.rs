//! One database session plus everything needed to bring it back after the server drops it.

mod exec;
mod tx;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::{ConnectionInfo, ReconnectPolicy};
use crate::driver::{Driver, NativeConnection, error_codes};
use crate::error::{ErrorClass, FatalReason, NativeError, SqlWorkerPoolError};
use crate::statement::{ConnectionKind, StatementRegistry, StatementTemplate};

/// Counters a connection keeps across its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Reconnects that ended with a usable session.
    pub reconnects: u32,
    /// `open()` calls made while reconnecting that failed.
    pub failed_reconnect_attempts: u32,
}

/// Whether a lost session should be retried transparently or reported after reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LostSession {
    /// Reconnect, then run the same call again on the new session.
    Retry,
    /// Reconnect, then hand the lost error back. Used inside transactions, whose earlier
    /// statements died with the old session.
    Report,
}

/// An owned handle to one database session.
///
/// Created closed. `open` establishes the native session; `prepare_statements` prepares
/// every registry template allowed for this connection's kind. Connection-lost errors
/// close the session and reopen it with the pool's [`ReconnectPolicy`]; the statements
/// prepared before are prepared again on the new session.
pub struct Connection {
    info: ConnectionInfo,
    kind: ConnectionKind,
    driver: Arc<dyn Driver>,
    registry: Arc<StatementRegistry>,
    handle: Option<Box<dyn NativeConnection>>,
    /// Statement id -> placeholder count the server reported when preparing it.
    prepared: BTreeMap<u32, usize>,
    policy: ReconnectPolicy,
    reconnecting: bool,
    stats: ConnectionStats,
}

impl Connection {
    #[must_use]
    pub fn new(
        info: ConnectionInfo,
        kind: ConnectionKind,
        driver: Arc<dyn Driver>,
        registry: Arc<StatementRegistry>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            info,
            kind,
            driver,
            registry,
            handle: None,
            prepared: BTreeMap::new(),
            policy,
            reconnecting: false,
            stats: ConnectionStats::default(),
        }
    }

    /// Establish the native session. On a reconnect, statements prepared on the previous
    /// session are prepared again before this returns.
    ///
    /// # Errors
    /// Returns `Database` with the driver's error if the session cannot be established or a
    /// statement cannot be prepared again.
    pub fn open(&mut self) -> Result<(), SqlWorkerPoolError> {
        let handle = self.driver.connect(&self.info).map_err(|err| {
            error!(connection = %self.info, kind = %self.kind, error = %err, "could not connect");
            SqlWorkerPoolError::Database(err)
        })?;
        debug!(
            connection = %self.info,
            kind = %self.kind,
            server_version = %handle.server_version(),
            "connected"
        );
        self.handle = Some(handle);

        let previously_prepared: Vec<u32> = self.prepared.keys().copied().collect();
        for id in previously_prepared {
            let template = self.template(id)?;
            self.prepare_template(&template)?;
        }
        Ok(())
    }

    /// Drop the native session. Prepared statements die with it; the ids stay recorded so
    /// a later `open` prepares them again.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!(connection = %self.info, kind = %self.kind, "closed");
        }
    }

    /// Forget the prepared-statement table as well as the session.
    pub(crate) fn shutdown(&mut self) {
        self.close();
        self.prepared.clear();
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Prepare every template allowed on this connection's kind.
    ///
    /// # Errors
    /// Returns the first preparation failure, or `ConfigError` if the server disagrees with
    /// a template about its placeholder count.
    pub fn prepare_statements(&mut self) -> Result<(), SqlWorkerPoolError> {
        let templates: Vec<Arc<StatementTemplate>> =
            self.registry.for_kind(self.kind).cloned().collect();
        for template in &templates {
            self.prepare_template(template)?;
        }
        debug!(
            connection = %self.info,
            kind = %self.kind,
            count = templates.len(),
            "prepared statements"
        );
        Ok(())
    }

    fn prepare_template(&mut self, template: &StatementTemplate) -> Result<(), SqlWorkerPoolError> {
        let Some(handle) = self.handle.as_deref_mut() else {
            return Err(SqlWorkerPoolError::ConnectionError(format!(
                "cannot prepare statement {} on closed connection {}",
                template.id(),
                self.info
            )));
        };
        let server_count = handle.prepare(template.id(), template.sql()).map_err(|err| {
            error!(
                statement = template.id(),
                sql = template.sql(),
                error = %err,
                "could not prepare statement"
            );
            SqlWorkerPoolError::Database(err)
        })?;
        if server_count != template.param_count() {
            return Err(SqlWorkerPoolError::ConfigError(format!(
                "statement {} declares {} parameters, server counts {server_count}",
                template.id(),
                template.param_count()
            )));
        }
        self.prepared.insert(template.id(), server_count);
        Ok(())
    }

    fn template(&self, id: u32) -> Result<Arc<StatementTemplate>, SqlWorkerPoolError> {
        self.registry
            .get(id)
            .cloned()
            .ok_or(SqlWorkerPoolError::Unprepared(id))
    }

    #[must_use]
    pub fn is_prepared(&self, id: u32) -> bool {
        self.prepared.contains_key(&id)
    }

    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Run `op` against the native session and classify whatever it reports.
    ///
    /// Connection-lost errors reconnect; with [`LostSession::Retry`] the call is repeated on
    /// the new session, at most once per allowed reconnect attempt.
    pub(crate) fn with_handle<T>(
        &mut self,
        on_lost: LostSession,
        mut op: impl FnMut(&mut dyn NativeConnection) -> Result<T, NativeError>,
    ) -> Result<T, SqlWorkerPoolError> {
        let mut reconnects = 0;
        loop {
            let result = match self.handle.as_deref_mut() {
                Some(handle) => op(handle),
                None => Err(NativeError::new(
                    error_codes::CR_SERVER_GONE_ERROR,
                    "connection is closed",
                )),
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::ConnectionLost => {
                    if reconnects >= self.policy.attempts {
                        error!(
                            connection = %self.info,
                            retries = reconnects,
                            error = %err,
                            "session keeps dropping after reconnect"
                        );
                        return Err(SqlWorkerPoolError::Fatal(FatalReason::RetryLoop {
                            retries: reconnects,
                            last: err,
                        }));
                    }
                    reconnects += 1;
                    self.reconnect(err.clone())?;
                    if on_lost == LostSession::Report {
                        return Err(SqlWorkerPoolError::Database(err));
                    }
                }
                ErrorClass::Deadlock => {
                    debug!(connection = %self.info, error = %err, "deadlock");
                    return Err(SqlWorkerPoolError::Database(err));
                }
                ErrorClass::Data => {
                    warn!(connection = %self.info, error = %err, "statement rejected");
                    return Err(SqlWorkerPoolError::Database(err));
                }
                ErrorClass::Schema => {
                    error!(
                        connection = %self.info,
                        error = %err,
                        "database structure does not match the statements issued"
                    );
                    return Err(SqlWorkerPoolError::Fatal(FatalReason::SchemaMismatch(err)));
                }
                ErrorClass::Other => {
                    error!(connection = %self.info, error = %err, "unhandled database error");
                    return Err(SqlWorkerPoolError::Database(err));
                }
            }
        }
    }

    /// Close the session and reopen it, sleeping longer before each attempt.
    fn reconnect(&mut self, cause: NativeError) -> Result<(), SqlWorkerPoolError> {
        warn!(
            connection = %self.info,
            kind = %self.kind,
            error = %cause,
            "lost connection to the database, reconnecting"
        );
        self.reconnecting = true;
        self.close();

        let mut last = cause;
        for attempt in 1..=self.policy.attempts {
            thread::sleep(self.policy.delay_before(attempt));
            match self.open() {
                Ok(()) => {
                    info!(connection = %self.info, attempt, "reconnected");
                    self.reconnecting = false;
                    self.stats.reconnects += 1;
                    return Ok(());
                }
                Err(err) => {
                    self.stats.failed_reconnect_attempts += 1;
                    warn!(connection = %self.info, attempt, error = %err, "reconnect attempt failed");
                    self.close();
                    last = match err {
                        SqlWorkerPoolError::Database(native) => native,
                        other => NativeError::new(error_codes::ER_UNKNOWN_ERROR, other.to_string()),
                    };
                }
            }
        }

        self.reconnecting = false;
        error!(
            connection = %self.info,
            attempts = self.policy.attempts,
            error = %last,
            "could not reconnect to the database"
        );
        Err(SqlWorkerPoolError::Fatal(FatalReason::ReconnectExhausted {
            attempts: self.policy.attempts,
            last,
        }))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .field("kind", &self.kind)
            .field("open", &self.is_open())
            .field("prepared", &self.prepared.len())
            .field("reconnecting", &self.reconnecting)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
