//! Bounded, durable history of inbound messages.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use switchboard_core::constants::HISTORY_CAPACITY;

use crate::errors::Result;
use crate::kv::{KvRepo, MESSAGES_KEY};
use crate::sqlite::ConnectionPool;

/// One inbound message as recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Group of the sending connection.
    pub group: String,
    /// The parsed message, stored verbatim.
    pub payload: Value,
    /// Receive time in unix milliseconds.
    pub timestamp: i64,
}

/// FIFO of the most recent [`MessageRecord`]s, oldest first.
pub struct HistoryLog {
    pool: ConnectionPool,
    entries: VecDeque<MessageRecord>,
    capacity: usize,
}

impl HistoryLog {
    /// Load with the default capacity.
    pub fn load(pool: ConnectionPool) -> Result<Self> {
        Self::with_capacity(pool, HISTORY_CAPACITY)
    }

    /// Load the persisted sequence, keeping at most `capacity` newest entries.
    pub fn with_capacity(pool: ConnectionPool, capacity: usize) -> Result<Self> {
        let stored = {
            let conn = pool.get()?;
            KvRepo::get(&conn, MESSAGES_KEY)?
        };
        let mut entries: VecDeque<MessageRecord> = match stored {
            None => VecDeque::new(),
            Some(value) => match serde_json::from_value::<Vec<MessageRecord>>(value) {
                Ok(records) => records.into(),
                Err(e) => {
                    warn!(error = %e, "stored history is unreadable, starting empty");
                    VecDeque::new()
                }
            },
        };
        while entries.len() > capacity {
            let _ = entries.pop_front();
        }
        debug!(entries = entries.len(), capacity, "history loaded");
        Ok(Self {
            pool,
            entries,
            capacity,
        })
    }

    /// Append a record stamped with the current time, evicting the oldest
    /// entry past capacity. Persisted before the in-memory log changes.
    pub fn record(&mut self, group: &str, payload: Value) -> Result<MessageRecord> {
        let record = MessageRecord {
            group: group.to_string(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let mut next = self.entries.clone();
        next.push_back(record.clone());
        while next.len() > self.capacity {
            let _ = next.pop_front();
        }

        let value = serde_json::to_value(&next)?;
        {
            let conn = self.pool.get()?;
            KvRepo::put(&conn, MESSAGES_KEY, &value)?;
        }
        self.entries = next;
        Ok(record)
    }

    /// Every entry, oldest first.
    pub fn all(&self) -> Vec<MessageRecord> {
        self.entries.iter().cloned().collect()
    }

    /// Entries from `group`, oldest first.
    pub fn for_group(&self, group: &str) -> Vec<MessageRecord> {
        self.entries
            .iter()
            .filter(|r| r.group == group)
            .cloned()
            .collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget the in-memory entries after storage was wiped.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
