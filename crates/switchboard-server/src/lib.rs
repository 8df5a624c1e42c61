//! # switchboard-server
//!
//! Control-plane broker for long-lived client sessions.
//!
//! Clients attach over WebSocket at `/api/connection?group=<id>` and are
//! grouped by that id. Operators use the bearer-protected `/api/*` routes to
//! push messages to a group, broadcast, kick, and manage the layered config.
//!
//! All broker state lives behind a single actor task ([`broker::Broker`]) so
//! every operation sees a consistent registry. Inbound client frames go
//! through the [`dispatcher::Dispatcher`]: keepalive registrations land in the
//! registrar, everything else in the bounded history. The
//! [`keepalive::KeepaliveScheduler`] pings registered URLs on an interval.

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod keepalive;
pub mod live;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use broker::{Broker, BrokerError, BrokerHandle};
pub use config::ServerConfig;
pub use keepalive::KeepaliveScheduler;
pub use live::LiveConnections;
pub use server::SwitchboardServer;
pub use shutdown::{DrainReport, ShutdownCoordinator};
