//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_settings::SwitchboardSettings;

/// Configuration for the Switchboard server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Bounded outbound queue per connection.
    pub send_queue_capacity: usize,
    /// Interval between server-initiated Ping frames, in seconds.
    pub ping_interval_secs: u64,
    /// Silence after which a connection is dropped, in seconds.
    pub pong_timeout_secs: u64,
    /// Bearer token required on admin routes. `None` leaves them open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &SwitchboardSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            send_queue_capacity: settings.server.send_queue_capacity.max(1),
            ping_interval_secs: settings.server.ping_interval_secs.max(1),
            pong_timeout_secs: settings.server.pong_timeout_secs.max(1),
            auth_token: settings.admin.auth_token.clone().filter(|t| !t.is_empty()),
        }
    }

    /// Ping interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong timeout as a [`Duration`].
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
            auth_token: None,
        }
    }
}
