use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use crate::error::SqlWorkerPoolError;

/// Where and as whom a connection logs in.
///
/// Parsed from the `host;port_or_socket;user;password;database[;ssl]` form used in the
/// server configuration files. A host of `.` means a local socket path in the second field.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port_or_socket: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl: bool,
}

impl ConnectionInfo {
    /// TCP port, if the second field is numeric.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port_or_socket.parse().ok()
    }

    /// Whether the second field names a local socket rather than a port.
    #[must_use]
    pub fn uses_socket(&self) -> bool {
        self.host == "."
    }
}

impl FromStr for ConnectionInfo {
    type Err = SqlWorkerPoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(';').collect();
        if fields.len() < 5 || fields.len() > 6 {
            return Err(SqlWorkerPoolError::ConfigError(format!(
                "connection string needs 5 or 6 ';'-separated fields, got {}",
                fields.len()
            )));
        }

        let ssl = match fields.get(5).map(|f| f.trim()) {
            None | Some("") => false,
            Some(flag) if flag.eq_ignore_ascii_case("ssl") => true,
            Some(other) => {
                return Err(SqlWorkerPoolError::ConfigError(format!(
                    "unknown connection flag '{other}', expected 'ssl'"
                )));
            }
        };

        let host = fields[0].trim();
        let port_or_socket = fields[1].trim();
        if host != "." && port_or_socket.parse::<u16>().is_err() {
            return Err(SqlWorkerPoolError::ConfigError(format!(
                "invalid port '{port_or_socket}' for host '{host}'"
            )));
        }

        Ok(ConnectionInfo {
            host: host.to_owned(),
            port_or_socket: port_or_socket.to_owned(),
            user: fields[2].trim().to_owned(),
            password: fields[3].to_owned(),
            database: fields[4].trim().to_owned(),
            ssl,
        })
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("port_or_socket", &self.port_or_socket)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl", &self.ssl)
            .finish()
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.user, self.host, self.port_or_socket, self.database
        )
    }
}

/// Sizing and retry knobs for a [`crate::DatabaseWorkerPool`].
///
/// Loadable from a config file through serde, overridable from the command line through
/// clap, or built fluently:
/// ```rust
/// use sql_worker_pool::PoolOptions;
///
/// let opts = PoolOptions::new().async_threads(2).synch_threads(1);
/// assert_eq!(opts.async_threads, 2);
/// ```
#[derive(Debug, Clone, Args, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Worker threads, each owning one asynchronous connection.
    #[arg(long, default_value_t = 1)]
    pub async_threads: u8,
    /// Connections shared by calling threads for synchronous queries.
    #[arg(long, default_value_t = 1)]
    pub synch_threads: u8,
    /// Reconnect attempts before the connection is declared dead. At least 1.
    #[arg(long, default_value_t = 5)]
    pub reconnect_attempts: u32,
    /// Base delay between reconnect attempts; grows with each failed attempt.
    #[arg(long, default_value_t = 3000)]
    pub reconnect_delay_ms: u64,
    /// Wall-clock budget for re-running a deadlocked transaction.
    #[arg(long, default_value_t = 60_000)]
    pub deadlock_retry_budget_ms: u64,
    /// Log a warning whenever a synchronous query runs.
    #[arg(long, default_value_t = false)]
    pub warn_about_sync_queries: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            async_threads: 1,
            synch_threads: 1,
            reconnect_attempts: 5,
            reconnect_delay_ms: 3000,
            deadlock_retry_budget_ms: 60_000,
            warn_about_sync_queries: false,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn async_threads(mut self, count: u8) -> Self {
        self.async_threads = count;
        self
    }

    #[must_use]
    pub fn synch_threads(mut self, count: u8) -> Self {
        self.synch_threads = count;
        self
    }

    #[must_use]
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn deadlock_retry_budget(mut self, budget: Duration) -> Self {
        self.deadlock_retry_budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_sync_query_warnings(mut self, warn: bool) -> Self {
        self.warn_about_sync_queries = warn;
        self
    }

    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            attempts: self.reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    #[must_use]
    pub fn deadlock_budget(&self) -> Duration {
        Duration::from_millis(self.deadlock_retry_budget_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), SqlWorkerPoolError> {
        if self.async_threads == 0 {
            return Err(SqlWorkerPoolError::ConfigError(
                "async_threads must be at least 1".into(),
            ));
        }
        if self.synch_threads == 0 {
            return Err(SqlWorkerPoolError::ConfigError(
                "synch_threads must be at least 1".into(),
            ));
        }
        if self.reconnect_attempts == 0 {
            return Err(SqlWorkerPoolError::ConfigError(
                "reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Bounded reconnect schedule: `attempts` tries, the n-th one preceded by `n * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        PoolOptions::default().reconnect_policy()
    }
}
