//! # switchboard
//!
//! Broker binary: loads layered settings, opens the `SQLite` store, starts
//! the broker actor, the keepalive scheduler, and the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_core::constants::VERSION;
use switchboard_core::logging::init_subscriber;
use switchboard_server::broker::DEFAULT_QUEUE_CAPACITY;
use switchboard_server::{Broker, KeepaliveScheduler, LiveConnections, ServerConfig, SwitchboardServer};
use switchboard_settings::{SwitchboardSettings, data_dir, load_settings_from_path, settings_path};
use switchboard_store::{ConnectionConfig, KeepaliveRegistrar, SqliteKeepaliveRegistrar, open_file};
use tracing::info;

/// Switchboard control-plane broker.
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about = "Switchboard control-plane broker")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file. Defaults to `~/.switchboard/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `switchboard_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Disable the keepalive pinger.
    #[arg(long)]
    no_keepalive: bool,
}

impl Cli {
    /// Layer command-line flags over file and environment settings.
    fn apply(&self, settings: &mut SwitchboardSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref path) = self.db_path {
            settings.storage.db_path = Some(path.to_string_lossy().into_owned());
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.no_keepalive {
            settings.keepalive.enabled = false;
        }
    }
}

fn db_path(settings: &SwitchboardSettings) -> PathBuf {
    settings
        .storage
        .db_path
        .as_ref()
        .map_or_else(|| data_dir().join("switchboard.db"), PathBuf::from)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_file = cli.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&settings_file)
        .with_context(|| format!("Failed to load settings: {}", settings_file.display()))?;
    cli.apply(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.json);
    info!(version = VERSION, settings = %settings_file.display(), "starting switchboard");

    let db_path = db_path(&settings);
    ensure_parent_dir(&db_path)?;
    let db_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let pool = open_file(db_str, &ConnectionConfig::default())
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    info!(path = %db_path.display(), "database opened");

    let live = LiveConnections::new();
    let (broker, broker_task) = Broker::spawn(pool.clone(), live.clone(), DEFAULT_QUEUE_CAPACITY)
        .context("Failed to load broker state")?;
    let registrar: Arc<dyn KeepaliveRegistrar> = Arc::new(SqliteKeepaliveRegistrar::new(pool));

    let config = ServerConfig::from_settings(&settings);
    let server = SwitchboardServer::new(config, broker, registrar.clone(), live);

    let shutdown = server.shutdown().clone();
    if settings.keepalive.enabled {
        let scheduler = KeepaliveScheduler::new(
            registrar,
            Duration::from_secs(settings.keepalive.interval_secs.max(1)),
            Duration::from_secs(settings.keepalive.request_timeout_secs.max(1)),
        )
        .context("Failed to build keepalive HTTP client")?;
        shutdown.track("keepalive", tokio::spawn(scheduler.run(shutdown.token())));
    } else {
        info!("keepalive pinger disabled");
    }

    let (addr, server_handle) = server.listen().await.with_context(|| {
        format!(
            "Failed to bind {}:{}",
            settings.server.host, settings.server.port
        )
    })?;
    shutdown.track("http", server_handle);
    info!(%addr, auth = settings.admin.auth_token.is_some(), "switchboard ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    let report = shutdown.drain().await;
    info!(finished = ?report.finished, aborted = ?report.aborted, "background tasks drained");

    // The actor exits once every handle is gone; sessions may still hold one.
    drop(server);
    if tokio::time::timeout(Duration::from_secs(2), broker_task).await.is_err() {
        info!("broker still draining, exiting anyway");
    }
    info!("switchboard stopped");
    Ok(())
}
