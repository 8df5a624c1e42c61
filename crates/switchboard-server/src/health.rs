//! `/health` body.

use std::time::Instant;

use serde::Serialize;

use crate::broker::BrokerCounts;

/// Whether the broker actor answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Broker answered.
    Ok,
    /// Broker actor gone.
    Unavailable,
}

/// `{status, uptime_secs, groups, connections}`.
#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    /// Broker liveness.
    pub status: HealthStatus,
    /// Whole seconds since the server was built.
    pub uptime_secs: u64,
    /// Registered groups. Zero when the broker is gone.
    pub groups: usize,
    /// Registered sessions, or open transports when the broker is gone.
    pub connections: usize,
}

impl HealthResponse {
    /// Broker answered with `counts`.
    pub fn ok(started: Instant, counts: BrokerCounts) -> Self {
        Self {
            status: HealthStatus::Ok,
            uptime_secs: started.elapsed().as_secs(),
            groups: counts.groups,
            connections: counts.connections,
        }
    }

    /// Broker did not answer; report what the transport layer still holds.
    pub fn unavailable(started: Instant, open_transports: usize) -> Self {
        Self {
            status: HealthStatus::Unavailable,
            uptime_secs: started.elapsed().as_secs(),
            groups: 0,
            connections: open_transports,
        }
    }
}
