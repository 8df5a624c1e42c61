//! Settings schema.
//!
//! Every struct uses `#[serde(default)]` so a settings file only needs the
//! keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Durable storage.
    pub storage: StorageSettings,
    /// Keepalive pinger.
    pub keepalive: KeepaliveSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Administrative surface.
    pub admin: AdminSettings,
}

/// Listener and per-connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before sends start failing.
    pub send_queue_capacity: usize,
    /// Seconds between server-initiated Ping frames.
    pub ping_interval_secs: u64,
    /// Seconds without a Pong before a session is dropped.
    pub pong_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
        }
    }
}

/// Durable storage location.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// `SQLite` database path. `None` resolves to `~/.switchboard/switchboard.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

/// Keepalive scheduler.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeepaliveSettings {
    /// Whether the scheduler runs at all.
    pub enabled: bool,
    /// Seconds between ticks.
    pub interval_secs: u64,
    /// Per-request timeout for the outbound GET, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            request_timeout_secs: 10,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Administrative surface.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminSettings {
    /// Bearer token required on `/api/*`. Unset leaves the API open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}
