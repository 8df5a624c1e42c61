//! Broker actor: single owner of registry, config, and history state.
//!
//! Every operation reaches the actor through [`BrokerHandle`] as a command on
//! an mpsc queue and is answered on a oneshot channel. Commands run one at a
//! time to completion. A command that panics discards the actor's state; the
//! state is reloaded from storage and registry membership is rebuilt from
//! [`LiveConnections`] alone.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::{Map, Value};
use switchboard_core::ConnectionId;
use switchboard_core::constants::{PRUNE_CLOSE_CODE, RESET_CONFIRMATION};
use switchboard_store::{
    ConfigDocument, ConfigStore, ConnectionPool, HistoryLog, MessageRecord, StoreError,
    reset_broker_storage,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::live::LiveConnections;
use crate::registry::{ConnectionRegistry, GroupStatus, SessionMetadata};
use crate::websocket::connection::ClientConnection;

/// Default depth of the broker command queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Errors returned by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The actor has stopped or dropped the request.
    #[error("broker is not running")]
    Unavailable,

    /// Durable storage rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Storage reset was requested without the confirmation token.
    #[error("storage reset requires confirm=confirm")]
    ConfirmationRequired,
}

/// Convenience type alias for broker results.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Group and connection totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerCounts {
    /// Groups with at least one session.
    pub groups: usize,
    /// Sessions across all groups.
    pub connections: usize,
}

/// State owned by the actor.
pub struct BrokerState {
    registry: ConnectionRegistry,
    config: ConfigStore,
    history: HistoryLog,
    pool: ConnectionPool,
}

impl BrokerState {
    /// Load config and history from storage and restore registry membership
    /// from the live connection set.
    pub fn load(pool: ConnectionPool, live: &LiveConnections) -> std::result::Result<Self, StoreError> {
        let config = ConfigStore::load(pool.clone())?;
        let history = HistoryLog::load(pool.clone())?;
        let mut registry = ConnectionRegistry::new();
        let restored = registry.restore(live.snapshot());
        if restored > 0 {
            info!(restored, groups = registry.group_count(), "registry restored from live connections");
        }
        Ok(Self {
            registry,
            config,
            history,
            pool,
        })
    }

    /// Register a session.
    pub fn connect(&mut self, group: &str, connection: Arc<ClientConnection>, metadata: SessionMetadata) {
        debug!(group, conn_id = %connection.id, "session added");
        self.registry.add(group, connection, metadata);
    }

    /// Unregister a session. Idempotent.
    pub fn disconnect(&mut self, id: &ConnectionId) -> bool {
        self.registry.remove(id)
    }

    /// Registry status.
    pub fn status(&self) -> BTreeMap<String, GroupStatus> {
        self.registry.status()
    }

    /// Deliver `message` to every session in `group`. Returns successful sends.
    pub fn push(&mut self, group: &str, message: &Value) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };
        let targets = self.registry.group_connections(group);
        let sent = self.deliver(&text, targets);
        debug!(group, sent, "push");
        sent
    }

    /// Deliver `message` to every session in every group.
    pub fn broadcast(&mut self, message: &Value) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };
        let targets = self.registry.all_connections();
        let sent = self.deliver(&text, targets);
        debug!(sent, "broadcast");
        sent
    }

    fn deliver(&mut self, text: &Arc<str>, targets: Vec<Arc<ClientConnection>>) -> usize {
        let mut sent = 0;
        for connection in targets {
            if connection.send(text.clone()) {
                sent += 1;
            } else {
                warn!(conn_id = %connection.id, "send failed, pruning session");
                let _ = self.registry.remove(&connection.id);
                let _ = connection.close(PRUNE_CLOSE_CODE, "send failed");
            }
        }
        sent
    }

    /// Close and forget every session in `group`.
    pub fn kick(&mut self, group: &str) -> usize {
        self.registry.kick(group)
    }

    /// Effective config for `group`.
    pub fn config(&self, group: &str) -> Map<String, Value> {
        self.config.resolve(group)
    }

    /// Merge top-level keys into the config document.
    pub fn update_config(&mut self, partial: ConfigDocument) -> Result<()> {
        Ok(self.config.update(partial)?)
    }

    /// The whole config document.
    pub fn raw_config(&self) -> ConfigDocument {
        self.config.raw().clone()
    }

    /// Replace the whole config document.
    pub fn set_raw_config(&mut self, document: ConfigDocument) -> Result<()> {
        Ok(self.config.set_raw(document)?)
    }

    /// Append to history.
    pub fn record(&mut self, group: &str, payload: Value) -> Result<MessageRecord> {
        Ok(self.history.record(group, payload)?)
    }

    /// History, optionally filtered by group.
    pub fn messages(&self, group: Option<&str>) -> Vec<MessageRecord> {
        match group {
            Some(group) => self.history.for_group(group),
            None => self.history.all(),
        }
    }

    /// Wipe config and history. `confirm` must equal the reset token.
    pub fn reset(&mut self, confirm: &str) -> Result<()> {
        if confirm != RESET_CONFIRMATION {
            return Err(BrokerError::ConfirmationRequired);
        }
        reset_broker_storage(&self.pool)?;
        self.config.reset();
        self.history.reset();
        Ok(())
    }

    /// Group and connection totals.
    pub fn counts(&self) -> BrokerCounts {
        BrokerCounts {
            groups: self.registry.group_count(),
            connections: self.registry.connection_count(),
        }
    }
}

fn encode(message: &Value) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            warn!(error = %e, "failed to serialize message");
            None
        }
    }
}

enum Command {
    Connect {
        group: String,
        connection: Arc<ClientConnection>,
        metadata: SessionMetadata,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<BTreeMap<String, GroupStatus>>,
    },
    Push {
        group: String,
        message: Value,
        reply: oneshot::Sender<usize>,
    },
    Broadcast {
        message: Value,
        reply: oneshot::Sender<usize>,
    },
    Kick {
        group: String,
        reply: oneshot::Sender<usize>,
    },
    Config {
        group: String,
        reply: oneshot::Sender<Map<String, Value>>,
    },
    UpdateConfig {
        partial: ConfigDocument,
        reply: oneshot::Sender<Result<()>>,
    },
    RawConfig {
        reply: oneshot::Sender<ConfigDocument>,
    },
    SetRawConfig {
        document: ConfigDocument,
        reply: oneshot::Sender<Result<()>>,
    },
    Record {
        group: String,
        payload: Value,
        reply: oneshot::Sender<Result<MessageRecord>>,
    },
    Messages {
        group: Option<String>,
        reply: oneshot::Sender<Vec<MessageRecord>>,
    },
    Reset {
        confirm: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Counts {
        reply: oneshot::Sender<BrokerCounts>,
    },
    #[cfg(test)]
    Crash,
}

impl BrokerState {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Connect {
                group,
                connection,
                metadata,
                reply,
            } => {
                self.connect(&group, connection, metadata);
                let _ = reply.send(());
            }
            Command::Disconnect { id, reply } => {
                let _ = reply.send(self.disconnect(&id));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Push {
                group,
                message,
                reply,
            } => {
                let _ = reply.send(self.push(&group, &message));
            }
            Command::Broadcast { message, reply } => {
                let _ = reply.send(self.broadcast(&message));
            }
            Command::Kick { group, reply } => {
                let _ = reply.send(self.kick(&group));
            }
            Command::Config { group, reply } => {
                let _ = reply.send(self.config(&group));
            }
            Command::UpdateConfig { partial, reply } => {
                let _ = reply.send(self.update_config(partial));
            }
            Command::RawConfig { reply } => {
                let _ = reply.send(self.raw_config());
            }
            Command::SetRawConfig { document, reply } => {
                let _ = reply.send(self.set_raw_config(document));
            }
            Command::Record {
                group,
                payload,
                reply,
            } => {
                let _ = reply.send(self.record(&group, payload));
            }
            Command::Messages { group, reply } => {
                let _ = reply.send(self.messages(group.as_deref()));
            }
            Command::Reset { confirm, reply } => {
                let _ = reply.send(self.reset(&confirm));
            }
            Command::Counts { reply } => {
                let _ = reply.send(self.counts());
            }
            #[cfg(test)]
            Command::Crash => panic!("injected broker failure"),
        }
    }
}

/// The actor task.
pub struct Broker {
    rx: mpsc::Receiver<Command>,
    state: BrokerState,
    pool: ConnectionPool,
    live: LiveConnections,
}

impl Broker {
    /// Load state and spawn the actor on the current runtime.
    pub fn spawn(
        pool: ConnectionPool,
        live: LiveConnections,
        queue_capacity: usize,
    ) -> std::result::Result<(BrokerHandle, JoinHandle<()>), StoreError> {
        let state = BrokerState::load(pool.clone(), &live)?;
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let broker = Self {
            rx,
            state,
            pool,
            live,
        };
        let handle = tokio::spawn(broker.run());
        Ok((BrokerHandle { tx }, handle))
    }

    async fn run(mut self) {
        info!("broker started");
        while let Some(command) = self.rx.recv().await {
            let state = &mut self.state;
            if catch_unwind(AssertUnwindSafe(|| state.apply(command))).is_err() {
                error!("broker command panicked, rebuilding state");
                match BrokerState::load(self.pool.clone(), &self.live) {
                    Ok(state) => self.state = state,
                    Err(e) => {
                        error!(error = %e, "failed to reload broker state, stopping");
                        break;
                    }
                }
            }
        }
        info!("broker stopped");
    }
}

/// Cloneable request handle to the broker actor.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::Sender<Command>,
}

impl BrokerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| BrokerError::Unavailable)?;
        rx.await.map_err(|_| BrokerError::Unavailable)
    }

    /// Register a session.
    pub async fn connect(
        &self,
        group: &str,
        connection: Arc<ClientConnection>,
        metadata: SessionMetadata,
    ) -> Result<()> {
        let group = group.to_string();
        self.request(|reply| Command::Connect {
            group,
            connection,
            metadata,
            reply,
        })
        .await
    }

    /// Unregister a session. `Ok(false)` if it was not registered.
    pub async fn disconnect(&self, id: &ConnectionId) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| Command::Disconnect { id, reply }).await
    }

    /// Per-group status.
    pub async fn status(&self) -> Result<BTreeMap<String, GroupStatus>> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Send `message` to one group.
    pub async fn push(&self, group: &str, message: Value) -> Result<usize> {
        let group = group.to_string();
        self.request(|reply| Command::Push {
            group,
            message,
            reply,
        })
        .await
    }

    /// Send `message` to every group.
    pub async fn broadcast(&self, message: Value) -> Result<usize> {
        self.request(|reply| Command::Broadcast { message, reply })
            .await
    }

    /// Evict a group.
    pub async fn kick(&self, group: &str) -> Result<usize> {
        let group = group.to_string();
        self.request(|reply| Command::Kick { group, reply }).await
    }

    /// Effective config for `group`.
    pub async fn config(&self, group: &str) -> Result<Map<String, Value>> {
        let group = group.to_string();
        self.request(|reply| Command::Config { group, reply }).await
    }

    /// Merge top-level keys into the config document.
    pub async fn update_config(&self, partial: ConfigDocument) -> Result<()> {
        self.request(|reply| Command::UpdateConfig { partial, reply })
            .await?
    }

    /// The whole config document.
    pub async fn raw_config(&self) -> Result<ConfigDocument> {
        self.request(|reply| Command::RawConfig { reply }).await
    }

    /// Replace the whole config document.
    pub async fn set_raw_config(&self, document: ConfigDocument) -> Result<()> {
        self.request(|reply| Command::SetRawConfig { document, reply })
            .await?
    }

    /// Append an inbound message to history.
    pub async fn record(&self, group: &str, payload: Value) -> Result<MessageRecord> {
        let group = group.to_string();
        self.request(|reply| Command::Record {
            group,
            payload,
            reply,
        })
        .await?
    }

    /// History, optionally filtered to one group.
    pub async fn messages(&self, group: Option<&str>) -> Result<Vec<MessageRecord>> {
        let group = group.map(str::to_string);
        self.request(|reply| Command::Messages { group, reply })
            .await
    }

    /// Wipe config and history.
    pub async fn reset(&self, confirm: &str) -> Result<()> {
        let confirm = confirm.to_string();
        self.request(|reply| Command::Reset { confirm, reply })
            .await?
    }

    /// Group and connection totals.
    pub async fn counts(&self) -> Result<BrokerCounts> {
        self.request(|reply| Command::Counts { reply }).await
    }

    #[cfg(test)]
    async fn crash(&self) {
        let _ = self.tx.send(Command::Crash).await;
    }
}
