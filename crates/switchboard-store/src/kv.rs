//! Key-value repository over the `kv` table.
//!
//! Values are JSON documents stored as text. The repository is stateless:
//! every method takes a `&Connection`.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use tracing::info;

use crate::errors::Result;
use crate::sqlite::ConnectionPool;

/// Key holding the config document.
pub const CONFIG_KEY: &str = "config";

/// Key holding the bounded message history array.
pub const MESSAGES_KEY: &str = "messages";

/// Key holding the group → keepalive URL map.
pub const KEEPALIVE_KEY: &str = "keepaliveUrls";

/// Key-value repository.
pub struct KvRepo;

impl KvRepo {
    /// Read and decode the value stored under `key`.
    pub fn get(conn: &Connection, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the value under `key`.
    pub fn put(conn: &Connection, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, text, now],
        )?;
        Ok(())
    }

    /// Delete `key`. Returns whether a row existed.
    pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
        let changed = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }
}

/// Delete the config document and the message history in one transaction.
///
/// The keepalive map is owned by the registrar and is left alone.
pub fn reset_broker_storage(pool: &ConnectionPool) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let _ = KvRepo::delete(&tx, CONFIG_KEY)?;
    let _ = KvRepo::delete(&tx, MESSAGES_KEY)?;
    tx.commit()?;
    info!("broker storage reset");
    Ok(())
}
