//! Package-level constants.

/// Current version of the Switchboard crates (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "switchboard";

/// Group used when a client connects without naming one.
pub const DEFAULT_GROUP: &str = "default";

/// Reserved top-level config key holding the defaults every group inherits.
pub const BASE_CONFIG_KEY: &str = "base";

/// Maximum number of inbound messages kept in the history log.
pub const HISTORY_CAPACITY: usize = 50;

/// Close code sent to every session of an evicted group (normal closure).
pub const KICK_CLOSE_CODE: u16 = 1000;

/// Close reason sent to every session of an evicted group.
pub const KICK_CLOSE_REASON: &str = "kicked";

/// Close code sent to a session pruned after a failed send (internal error).
pub const PRUNE_CLOSE_CODE: u16 = 1011;

/// Text frame clients send as an application-level liveness probe.
pub const PROBE_PING: &str = "ping";

/// Text frame answered to [`PROBE_PING`] without involving the broker.
pub const PROBE_PONG: &str = "pong";

/// Token the storage reset endpoint requires in its `confirm` parameter.
pub const RESET_CONFIRMATION: &str = "confirm";

/// Inbound message type that registers a keepalive callback URL.
pub const KEEPALIVE_MESSAGE_TYPE: &str = "keepalive";
