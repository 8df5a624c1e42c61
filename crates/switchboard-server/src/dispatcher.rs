//! Inbound message routing.
//!
//! `{"type":"keepalive","data":"<url>"}` registers a callback URL for the
//! sender's group. Any other JSON value goes to history. Unparseable frames
//! are dropped. Nothing is ever sent back.

use std::sync::Arc;

use serde_json::Value;
use switchboard_core::constants::KEEPALIVE_MESSAGE_TYPE;
use switchboard_store::KeepaliveRegistrar;
use tracing::{debug, warn};

use crate::broker::BrokerHandle;

/// A parsed inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Keepalive registration with a non-empty URL.
    Keepalive {
        /// Callback URL.
        url: String,
    },
    /// Anything else, recorded verbatim.
    Other(Value),
}

/// Parse and classify a frame. `None` if it is not JSON.
pub fn classify(text: &str) -> Option<Inbound> {
    let value: Value = serde_json::from_str(text).ok()?;
    let keepalive_url = value
        .as_object()
        .filter(|obj| obj.get("type").and_then(Value::as_str) == Some(KEEPALIVE_MESSAGE_TYPE))
        .and_then(|obj| obj.get("data"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string);
    Some(match keepalive_url {
        Some(url) => Inbound::Keepalive { url },
        None => Inbound::Other(value),
    })
}

/// What happened to a dispatched frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not JSON; ignored.
    Dropped,
    /// Keepalive URL registered.
    Keepalive,
    /// Appended to history.
    Recorded,
    /// The registrar or history write failed.
    Failed,
}

/// Routes inbound frames to the registrar or the broker's history.
pub struct Dispatcher {
    broker: BrokerHandle,
    registrar: Arc<dyn KeepaliveRegistrar>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(broker: BrokerHandle, registrar: Arc<dyn KeepaliveRegistrar>) -> Self {
        Self { broker, registrar }
    }

    /// Handle one inbound text frame from a session in `group`.
    pub async fn dispatch(&self, group: &str, text: &str) -> DispatchOutcome {
        match classify(text) {
            None => {
                debug!(group, len = text.len(), "dropping non-JSON frame");
                DispatchOutcome::Dropped
            }
            Some(Inbound::Keepalive { url }) => match self.registrar.register(group, &url).await {
                Ok(()) => DispatchOutcome::Keepalive,
                Err(e) => {
                    warn!(group, error = %e, "failed to register keepalive url");
                    DispatchOutcome::Failed
                }
            },
            Some(Inbound::Other(payload)) => match self.broker.record(group, payload).await {
                Ok(_) => DispatchOutcome::Recorded,
                Err(e) => {
                    warn!(group, error = %e, "failed to record inbound message");
                    DispatchOutcome::Failed
                }
            },
        }
    }
}
