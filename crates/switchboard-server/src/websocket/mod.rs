//! WebSocket connection state and per-connection session tasks.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Shared handle: bounded send queue, close request, attachment, liveness |
//! | `session` | Upgrade → register → read/write loops → cleanup |

pub mod connection;
pub mod session;
