//! # switchboard-core
//!
//! Shared vocabulary for the Switchboard crates:
//!
//! - **Branded IDs**: [`ids::ConnectionId`] as a newtype over a UUID v7 string
//! - **Constants**: default group, history capacity, close codes, probe frames
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod logging;

pub use ids::ConnectionId;
