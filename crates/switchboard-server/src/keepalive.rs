//! Periodic pinger for registered keepalive URLs.
//!
//! Each tick reads the registrar and fires one `GET` per group. Requests run
//! on their own tasks so a slow endpoint never delays the next tick.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CACHE_CONTROL, PRAGMA};
use switchboard_store::{KeepaliveRegistrar, StoreError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fires keepalive requests on a fixed interval.
pub struct KeepaliveScheduler {
    registrar: Arc<dyn KeepaliveRegistrar>,
    client: reqwest::Client,
    interval: Duration,
}

impl KeepaliveScheduler {
    /// Create a scheduler. `request_timeout` bounds each individual request.
    pub fn new(
        registrar: Arc<dyn KeepaliveRegistrar>,
        interval: Duration,
        request_timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("switchboard-keepalive/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            registrar,
            client,
            interval,
        })
    }

    /// Run one tick: spawn a request for every registered URL.
    ///
    /// Returns the spawned request tasks. A registrar read failure aborts the
    /// tick before anything is spawned.
    pub async fn tick(&self) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let urls = self.registrar.all().await?;
        let handles = urls
            .into_iter()
            .filter(|(_, url)| !url.is_empty())
            .map(|(group, url)| {
                let client = self.client.clone();
                tokio::spawn(async move {
                    let result = client
                        .get(&url)
                        .header(CACHE_CONTROL, "no-cache")
                        .header(PRAGMA, "no-cache")
                        .send()
                        .await;
                    match result {
                        Ok(resp) => debug!(group, url, status = %resp.status(), "keepalive ping"),
                        Err(e) => debug!(group, url, error = %e, "keepalive ping failed"),
                    }
                })
            })
            .collect();
        Ok(handles)
    }

    /// Tick until `cancel` fires. The first tick happens immediately.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "keepalive scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(handles) => debug!(pinged = handles.len(), "keepalive tick"),
                        Err(e) => warn!(error = %e, "keepalive tick skipped"),
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        info!("keepalive scheduler stopped");
    }
}
