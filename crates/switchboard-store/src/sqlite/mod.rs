//! `SQLite` backend: connection pooling and schema migrations.

pub mod connection;
pub mod migrations;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_file, new_in_memory};
pub use migrations::{current_version, latest_version, run_migrations};
