//! In-memory index of live sessions grouped by group id.
//!
//! A group is present only while it holds at least one session. Each
//! connection carries its own serialized [`SessionAttachment`], which is all
//! [`ConnectionRegistry::restore`] needs to rebuild membership.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use switchboard_core::ConnectionId;
use switchboard_core::constants::{KICK_CLOSE_CODE, KICK_CLOSE_REASON};
use tracing::{debug, info, warn};

use crate::websocket::connection::ClientConnection;

/// Per-session metadata supplied at upgrade time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Client-reported version string.
    pub version: Option<String>,
    /// Resolved source address of the client.
    pub source_address: Option<String>,
    /// Accept time in unix milliseconds.
    pub connected_at: i64,
}

impl SessionMetadata {
    /// Metadata stamped with the current time.
    pub fn now(version: Option<String>, source_address: Option<String>) -> Self {
        Self {
            version,
            source_address,
            connected_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// What a connection carries about its own session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAttachment {
    /// Group the session belongs to.
    pub group: String,
    /// Session metadata.
    #[serde(flatten)]
    pub metadata: SessionMetadata,
}

/// Status of one group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupStatus {
    /// Live session count.
    pub connections: usize,
    /// One entry per session.
    pub sessions: Vec<SessionMetadata>,
}

struct Session {
    connection: Arc<ClientConnection>,
    metadata: SessionMetadata,
}

/// Group id → sessions, plus a reverse index from connection to group.
#[derive(Default)]
pub struct ConnectionRegistry {
    groups: HashMap<String, BTreeMap<ConnectionId, Session>>,
    index: HashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session and write its attachment onto the connection.
    ///
    /// A connection already registered elsewhere is moved.
    pub fn add(&mut self, group: &str, connection: Arc<ClientConnection>, metadata: SessionMetadata) {
        let attachment = SessionAttachment {
            group: group.to_string(),
            metadata: metadata.clone(),
        };
        match serde_json::to_string(&attachment) {
            Ok(encoded) => connection.serialize_attachment(encoded),
            Err(e) => warn!(conn_id = %connection.id, error = %e, "failed to encode attachment"),
        }
        self.insert(group, connection, metadata);
    }

    fn insert(&mut self, group: &str, connection: Arc<ClientConnection>, metadata: SessionMetadata) {
        let _ = self.remove(&connection.id);
        let id = connection.id.clone();
        let _ = self
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(id.clone(), Session { connection, metadata });
        let _ = self.index.insert(id, group.to_string());
    }

    /// Remove a session by connection id, dropping its group if it empties.
    ///
    /// Returns whether the connection was registered.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        let Some(group) = self.index.remove(id) else {
            return false;
        };
        if let Some(sessions) = self.groups.get_mut(&group) {
            let _ = sessions.remove(id);
            if sessions.is_empty() {
                let _ = self.groups.remove(&group);
            }
        }
        true
    }

    /// Per-group counts and session metadata.
    pub fn status(&self) -> BTreeMap<String, GroupStatus> {
        self.groups
            .iter()
            .map(|(group, sessions)| {
                let status = GroupStatus {
                    connections: sessions.len(),
                    sessions: sessions.values().map(|s| s.metadata.clone()).collect(),
                };
                (group.clone(), status)
            })
            .collect()
    }

    /// Close every session in `group` and forget the group.
    ///
    /// Returns how many sessions the group held. Individual close failures
    /// are ignored.
    pub fn kick(&mut self, group: &str) -> usize {
        let Some(sessions) = self.groups.remove(group) else {
            return 0;
        };
        let count = sessions.len();
        for (id, session) in sessions {
            let _ = self.index.remove(&id);
            if !session.connection.close(KICK_CLOSE_CODE, KICK_CLOSE_REASON) {
                debug!(group, conn_id = %id, "kicked connection was already closing");
            }
        }
        info!(group, count, "group kicked");
        count
    }

    /// Connections currently in `group`.
    pub fn group_connections(&self, group: &str) -> Vec<Arc<ClientConnection>> {
        self.groups
            .get(group)
            .map(|sessions| sessions.values().map(|s| s.connection.clone()).collect())
            .unwrap_or_default()
    }

    /// Every registered connection.
    pub fn all_connections(&self) -> Vec<Arc<ClientConnection>> {
        self.groups
            .values()
            .flat_map(|sessions| sessions.values().map(|s| s.connection.clone()))
            .collect()
    }

    /// Reinsert connections from their attachments.
    ///
    /// Connections without a decodable attachment, or already closing, are
    /// skipped. Returns how many were restored.
    pub fn restore<I>(&mut self, connections: I) -> usize
    where
        I: IntoIterator<Item = Arc<ClientConnection>>,
    {
        let mut restored = 0;
        for connection in connections {
            if connection.is_closing() {
                continue;
            }
            let Some(raw) = connection.attachment() else {
                continue;
            };
            let Some(attachment) = serde_json::from_str::<SessionAttachment>(&raw)
                .ok()
                .filter(|a| !a.group.is_empty())
            else {
                debug!(conn_id = %connection.id, "skipping connection with unreadable attachment");
                continue;
            };
            self.insert(&attachment.group, connection, attachment.metadata);
            restored += 1;
        }
        restored
    }

    /// Number of groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of sessions across all groups.
    pub fn connection_count(&self) -> usize {
        self.index.len()
    }

    /// Whether `group` currently has sessions.
    pub fn contains_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn conn(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(ClientConnection::new(ConnectionId::from(id), tx)), rx)
    }

    fn meta(version: &str) -> SessionMetadata {
        SessionMetadata {
            version: Some(version.into()),
            source_address: Some("10.0.0.1".into()),
            connected_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn unknown_group_is_absent() {
        let mut reg = ConnectionRegistry::new();
        assert!(!reg.status().contains_key("G"));
        assert_eq!(reg.kick("G"), 0);
        assert!(reg.group_connections("G").is_empty());
    }

    #[test]
    fn add_counts_per_group() {
        let mut reg = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        let (c2, _r2) = conn("c2");
        reg.add("A", c1, meta("1.0"));
        reg.add("A", c2, meta("1.1"));

        let status = reg.status();
        assert_eq!(status["A"].connections, 2);
        assert_eq!(status["A"].sessions.len(), 2);
        assert_eq!(reg.connection_count(), 2);
    }

    #[test]
    fn remove_deletes_empty_group() {
        let mut reg = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        let (c2, _r2) = conn("c2");
        reg.add("A", c1.clone(), meta("1"));
        reg.add("A", c2.clone(), meta("1"));

        assert!(reg.remove(&c1.id));
        assert_eq!(reg.status()["A"].connections, 1);
        assert!(reg.remove(&c2.id));
        assert!(!reg.status().contains_key("A"));
        assert!(!reg.remove(&c2.id));
    }

    #[test]
    fn add_writes_attachment() {
        let mut reg = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        reg.add("A", c1.clone(), meta("2.0"));

        let decoded: SessionAttachment =
            serde_json::from_str(&c1.attachment().unwrap()).unwrap();
        assert_eq!(decoded.group, "A");
        assert_eq!(decoded.metadata, meta("2.0"));
    }

    #[test]
    fn attachment_wire_shape() {
        let attachment = SessionAttachment {
            group: "A".into(),
            metadata: meta("1"),
        };
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["group"], "A");
        assert_eq!(json["sourceAddress"], "10.0.0.1");
        assert_eq!(json["connectedAt"], 1_700_000_000_000_i64);
    }

    #[test]
    fn status_serializes_camel_case_sessions() {
        let mut reg = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        reg.add("A", c1, meta("1"));
        let json = serde_json::to_value(reg.status()).unwrap();
        assert_eq!(json["A"]["connections"], 1);
        assert_eq!(json["A"]["sessions"][0]["version"], "1");
        assert_eq!(json["A"]["sessions"][0]["sourceAddress"], "10.0.0.1");
    }

    #[test]
    fn re_adding_moves_between_groups() {
        let mut reg = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        reg.add("A", c1.clone(), meta("1"));
        reg.add("B", c1, meta("1"));
        let status = reg.status();
        assert!(!status.contains_key("A"));
        assert_eq!(status["B"].connections, 1);
    }

    #[test]
    fn kick_closes_and_removes_group() {
        let mut reg = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        let (c2, _r2) = conn("c2");
        let (c3, _r3) = conn("c3");
        reg.add("A", c1.clone(), meta("1"));
        reg.add("A", c2.clone(), meta("1"));
        reg.add("B", c3.clone(), meta("1"));

        assert_eq!(reg.kick("A"), 2);
        assert!(!reg.contains_group("A"));
        assert!(reg.contains_group("B"));
        assert_eq!(reg.connection_count(), 1);

        let req = c1.take_close_request().unwrap();
        assert_eq!(req.code, 1000);
        assert_eq!(req.reason, "kicked");
        assert!(c2.is_closing());
        assert!(!c3.is_closing());
    }

    #[test]
    fn kick_removes_group_even_when_close_fails() {
        let mut reg = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        reg.add("A", c1.clone(), meta("1"));
        c1.mark_closed();

        assert_eq!(reg.kick("A"), 1);
        assert!(!reg.status().contains_key("A"));
        assert!(!reg.remove(&c1.id));
    }

    #[test]
    fn restore_reproduces_status() {
        let mut original = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        let (c2, _r2) = conn("c2");
        let (c3, _r3) = conn("c3");
        original.add("A", c1.clone(), meta("1"));
        original.add("A", c2.clone(), meta("2"));
        original.add("B", c3.clone(), meta("3"));

        let mut rebuilt = ConnectionRegistry::new();
        assert_eq!(rebuilt.restore(vec![c1, c2, c3]), 3);
        assert_eq!(rebuilt.status(), original.status());
    }

    #[test]
    fn restore_skips_missing_and_corrupt_attachments() {
        let (good, _r1) = conn("good");
        let (missing, _r2) = conn("missing");
        let (corrupt, _r3) = conn("corrupt");
        let (ungrouped, _r4) = conn("ungrouped");
        let mut original = ConnectionRegistry::new();
        original.add("A", good.clone(), meta("1"));
        corrupt.serialize_attachment("not json".into());
        ungrouped.serialize_attachment(r#"{"group":"","connectedAt":1}"#.into());

        let mut rebuilt = ConnectionRegistry::new();
        assert_eq!(rebuilt.restore(vec![good, missing, corrupt, ungrouped]), 1);
        assert!(!rebuilt.contains_group(""));
        assert_eq!(rebuilt.status()["A"].connections, 1);
        assert_eq!(rebuilt.connection_count(), 1);
    }

    #[test]
    fn restore_skips_closing_connections() {
        let (c1, _r1) = conn("c1");
        let mut original = ConnectionRegistry::new();
        original.add("A", c1.clone(), meta("1"));
        let _ = c1.close(1000, "bye");

        let mut rebuilt = ConnectionRegistry::new();
        assert_eq!(rebuilt.restore(vec![c1]), 0);
        assert_eq!(rebuilt.group_count(), 0);
    }

    #[test]
    fn all_connections_spans_groups() {
        let mut reg = ConnectionRegistry::new();
        let (c1, _r1) = conn("c1");
        let (c2, _r2) = conn("c2");
        reg.add("A", c1, meta("1"));
        reg.add("B", c2, meta("1"));
        assert_eq!(reg.all_connections().len(), 2);
        assert_eq!(reg.group_count(), 2);
    }
}
