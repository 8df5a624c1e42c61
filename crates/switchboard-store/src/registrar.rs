//! Keepalive registrar: group → callback URL.
//!
//! The dispatcher writes through [`KeepaliveRegistrar::register`] when a
//! connection announces its URL; the keepalive scheduler reads the whole map
//! each tick.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rusqlite::TransactionBehavior;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::kv::{KEEPALIVE_KEY, KvRepo};
use crate::sqlite::ConnectionPool;

/// Group id → callback URL.
pub type KeepaliveMap = BTreeMap<String, String>;

/// Narrow read/write interface over the keepalive map.
#[async_trait]
pub trait KeepaliveRegistrar: Send + Sync {
    /// Current map.
    async fn all(&self) -> Result<KeepaliveMap>;

    /// Set the URL for `group`, overwriting any previous value.
    async fn register(&self, group: &str, url: &str) -> Result<()>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;
}

/// Registrar persisted under [`KEEPALIVE_KEY`] in the kv table.
#[derive(Clone)]
pub struct SqliteKeepaliveRegistrar {
    pool: ConnectionPool,
}

impl SqliteKeepaliveRegistrar {
    /// Create a registrar over `pool`.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

fn decode(value: Option<Value>) -> KeepaliveMap {
    match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(group, url)| match url {
                Value::String(url) => Some((group, url)),
                _ => None,
            })
            .collect(),
        Some(_) => {
            warn!("stored keepalive map is not an object, treating as empty");
            KeepaliveMap::new()
        }
        None => KeepaliveMap::new(),
    }
}

#[async_trait]
impl KeepaliveRegistrar for SqliteKeepaliveRegistrar {
    async fn all(&self) -> Result<KeepaliveMap> {
        let conn = self.pool.get()?;
        Ok(decode(KvRepo::get(&conn, KEEPALIVE_KEY)?))
    }

    async fn register(&self, group: &str, url: &str) -> Result<()> {
        // Take the write lock before reading so concurrent writers queue on
        // busy_timeout instead of failing with a stale WAL snapshot.
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut map = decode(KvRepo::get(&tx, KEEPALIVE_KEY)?);
        let _ = map.insert(group.to_string(), url.to_string());
        KvRepo::put(&tx, KEEPALIVE_KEY, &serde_json::to_value(&map)?)?;
        tx.commit()?;
        debug!(group, url, "keepalive url registered");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.pool.get()?;
        let _ = KvRepo::delete(&conn, KEEPALIVE_KEY)?;
        debug!("keepalive map cleared");
        Ok(())
    }
}
