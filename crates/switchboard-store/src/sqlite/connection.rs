//! `r2d2` pools over `SQLite`.

use std::time::Duration;

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Pool of `SQLite` connections.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Connection checked out of a [`ConnectionPool`].
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool tuning.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Connections kept by a file-backed pool.
    pub pool_size: u32,
    /// `PRAGMA busy_timeout`, in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Applied to every connection the pool opens.
#[derive(Debug)]
struct Pragmas {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<Connection, rusqlite::Error> for Pragmas {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        // in-memory databases answer "memory" here
        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(Duration::from_millis(u64::from(self.busy_timeout_ms)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
    }
}

fn builder(config: &ConnectionConfig) -> r2d2::Builder<SqliteConnectionManager> {
    Pool::builder()
        .connection_timeout(CHECKOUT_TIMEOUT)
        .connection_customizer(Box::new(Pragmas {
            busy_timeout_ms: config.busy_timeout_ms,
        }))
}

/// Pool over a private in-memory database.
///
/// Each in-memory connection is a separate database, so this pool holds
/// exactly one connection and never retires it. `pool_size` is ignored.
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    Ok(builder(config)
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(SqliteConnectionManager::memory())?)
}

/// Pool over the database file at `path`, created if missing.
pub fn new_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    Ok(builder(config)
        .max_size(config.pool_size.max(1))
        .build(SqliteConnectionManager::file(path))?)
}
