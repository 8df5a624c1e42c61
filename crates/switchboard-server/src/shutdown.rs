//! Process-wide shutdown: one cancellation token plus the background tasks
//! that must finish (or be aborted) before the process exits.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period for tracked tasks after the token fires.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Outcome of [`ShutdownCoordinator::drain`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that exited within the grace period.
    pub finished: Vec<&'static str>,
    /// Tasks aborted after the grace period ran out.
    pub aborted: Vec<&'static str>,
}

/// Owns the shutdown token handed to the listener, the keepalive scheduler,
/// and every session forwarder.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with [`DEFAULT_GRACE`].
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    /// Coordinator with a custom grace period.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            grace,
        }
    }

    /// A child of the shutdown token.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Register a background task to wait for during [`drain`](Self::drain).
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push((name, handle));
    }

    /// Fire the token. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether [`trigger`](Self::trigger) has run.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the token and wait for tracked tasks, sharing one deadline.
    /// Tasks still running at the deadline are aborted.
    pub async fn drain(&self) -> DrainReport {
        self.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(tasks = tasks.len(), grace_secs = self.grace.as_secs(), "draining");

        let deadline = tokio::time::Instant::now() + self.grace;
        let mut report = DrainReport::default();
        for (name, mut handle) in tasks {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_ok() {
                report.finished.push(name);
            } else {
                warn!(task = name, "task did not stop in time, aborting");
                handle.abort();
                report.aborted.push(name);
            }
        }
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_cancels_handed_out_tokens() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!coord.is_triggered());
        coord.trigger();
        coord.trigger();
        assert!(coord.is_triggered());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_cooperative_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.track("listener", tokio::spawn(async move { token.cancelled().await }));

        let report = coord.drain().await;
        assert_eq!(report.finished, vec!["listener"]);
        assert!(report.aborted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_stragglers() {
        let coord = ShutdownCoordinator::with_grace(Duration::from_millis(100));
        let token = coord.token();
        coord.track("keepalive", tokio::spawn(async move { token.cancelled().await }));
        coord.track(
            "stuck",
            tokio::spawn(tokio::time::sleep(Duration::from_secs(300))),
        );

        let report = coord.drain().await;
        assert_eq!(report.finished, vec!["keepalive"]);
        assert_eq!(report.aborted, vec!["stuck"]);
    }

    #[tokio::test]
    async fn drain_with_nothing_tracked() {
        assert_eq!(ShutdownCoordinator::new().drain().await, DrainReport::default());
    }
}
