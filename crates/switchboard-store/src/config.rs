//! Layered config document.
//!
//! The document maps the reserved key `base` plus arbitrary group ids to JSON
//! values. A group's effective config is the one-level merge of `base` with the
//! group's own entry, the group winning on conflicting keys.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use switchboard_core::constants::BASE_CONFIG_KEY;

use crate::errors::Result;
use crate::kv::{CONFIG_KEY, KvRepo};
use crate::sqlite::ConnectionPool;

/// The whole persisted config document.
pub type ConfigDocument = Map<String, Value>;

/// Shallow-merge `overlay` over `base`.
///
/// Anything that is not a JSON object (including a missing value) counts as
/// an empty object.
pub fn shallow_merge(base: Option<&Value>, overlay: Option<&Value>) -> Map<String, Value> {
    let mut merged = match base {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    if let Some(Value::Object(map)) = overlay {
        for (key, value) in map {
            let _ = merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn empty_document() -> ConfigDocument {
    let mut doc = Map::new();
    let _ = doc.insert(BASE_CONFIG_KEY.to_string(), Value::Object(Map::new()));
    doc
}

/// Config document cached in memory and persisted under [`CONFIG_KEY`].
pub struct ConfigStore {
    pool: ConnectionPool,
    document: ConfigDocument,
}

impl ConfigStore {
    /// Load the document from storage, starting from `{"base": {}}` if absent.
    pub fn load(pool: ConnectionPool) -> Result<Self> {
        let stored = {
            let conn = pool.get()?;
            KvRepo::get(&conn, CONFIG_KEY)?
        };
        let document = match stored {
            Some(Value::Object(doc)) => doc,
            Some(other) => {
                warn!(kind = json_kind(&other), "stored config is not an object, starting empty");
                empty_document()
            }
            None => empty_document(),
        };
        debug!(keys = document.len(), "config loaded");
        Ok(Self { pool, document })
    }

    /// Effective config for `group`: `base` overlaid with the group's entry.
    pub fn resolve(&self, group: &str) -> Map<String, Value> {
        shallow_merge(self.document.get(BASE_CONFIG_KEY), self.document.get(group))
    }

    /// The full document, merge semantics bypassed.
    pub fn raw(&self) -> &ConfigDocument {
        &self.document
    }

    /// Merge the top-level keys of `partial` into the document and persist it.
    ///
    /// Each top-level key is replaced wholesale (last writer wins); nested
    /// objects are not merged.
    pub fn update(&mut self, partial: ConfigDocument) -> Result<()> {
        let mut next = self.document.clone();
        for (key, value) in partial {
            let _ = next.insert(key, value);
        }
        self.replace(next)
    }

    /// Replace the whole document and persist it.
    pub fn set_raw(&mut self, document: ConfigDocument) -> Result<()> {
        self.replace(document)
    }

    /// Forget the in-memory document after storage was wiped.
    pub fn reset(&mut self) {
        self.document = empty_document();
    }

    fn replace(&mut self, next: ConfigDocument) -> Result<()> {
        let value = Value::Object(next);
        {
            let conn = self.pool.get()?;
            KvRepo::put(&conn, CONFIG_KEY, &value)?;
        }
        if let Value::Object(doc) = value {
            self.document = doc;
        }
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
