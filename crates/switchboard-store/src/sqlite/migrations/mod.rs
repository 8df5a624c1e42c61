//! Schema steps, tracked in `PRAGMA user_version`.
//!
//! Step `n` moves the database from version `n - 1` to `n`. Each step runs in
//! its own transaction together with the version bump.

use rusqlite::Connection;
use tracing::info;

use crate::errors::{Result, StoreError};

/// Ordered schema steps. Index + 1 is the version each one produces.
const STEPS: &[(&str, &str)] = &[(
    "kv table for config, messages, and keepalive urls",
    include_str!("v001_kv.sql"),
)];

/// Bring the schema up to date. Returns how many steps ran.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let from = current_version(conn)?;
    let mut ran = 0;
    for (version, (label, sql)) in (1u32..).zip(STEPS) {
        if version <= from {
            continue;
        }
        info!(version, label, "upgrading schema");
        step(conn, version, sql)?;
        ran += 1;
    }
    Ok(ran)
}

/// Schema version recorded in the database file.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| StoreError::Migration {
            message: format!("reading user_version: {e}"),
        })
}

/// Version the code expects.
pub fn latest_version() -> u32 {
    u32::try_from(STEPS.len()).unwrap_or(u32::MAX)
}

fn step(conn: &Connection, version: u32, sql: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)
        .and_then(|()| tx.pragma_update(None, "user_version", version))
        .map_err(|e| StoreError::Migration {
            message: format!("v{version}: {e}"),
        })?;
    tx.commit()?;
    Ok(())
}
