//! # switchboard-store
//!
//! Durable state for the broker, kept in a single `SQLite` key-value table:
//!
//! - **[`ConfigStore`]**: the layered config document (`base` + per-group overrides)
//! - **[`HistoryLog`]**: the bounded FIFO of recent inbound messages
//! - **[`SqliteKeepaliveRegistrar`]**: group → callback URL map read by the keepalive pinger
//!
//! Every mutation is written to the database before the in-memory copy is
//! replaced, so a failed write never leaves memory ahead of disk.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod history;
pub mod kv;
pub mod registrar;
pub mod sqlite;

pub use config::{ConfigDocument, ConfigStore, shallow_merge};
pub use errors::{Result, StoreError};
pub use history::{HistoryLog, MessageRecord};
pub use kv::{CONFIG_KEY, KEEPALIVE_KEY, KvRepo, MESSAGES_KEY, reset_broker_storage};
pub use registrar::{KeepaliveMap, KeepaliveRegistrar, SqliteKeepaliveRegistrar};
pub use sqlite::{ConnectionConfig, ConnectionPool, new_file, new_in_memory, run_migrations};

/// Open an in-memory pool with the schema applied (for tests and ephemeral runs).
pub fn open_in_memory() -> Result<ConnectionPool> {
    let pool = new_in_memory(&ConnectionConfig::default())?;
    {
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
    }
    Ok(pool)
}

/// Open a file-backed pool at `path` with the schema applied.
pub fn open_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let pool = new_file(path, config)?;
    {
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
    }
    Ok(pool)
}
