//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use switchboard_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Close frame requested by the server side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason sent to the peer.
    pub reason: String,
}

/// Represents a connected WebSocket client.
///
/// Owned jointly by the session task, the [`LiveConnections`] set, and the
/// broker's registry. Writes go through a bounded channel drained by the
/// session's outbound forwarder.
///
/// [`LiveConnections`]: crate::live::LiveConnections
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<str>>,
    /// Serialized session attachment written by the registry.
    attachment: Mutex<Option<String>>,
    /// Set once the server decided to close the connection.
    closing: CancellationToken,
    close_request: Mutex<Option<CloseRequest>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last ping.
    pub is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            attachment: Mutex::new(None),
            closing: CancellationToken::new(),
            close_request: Mutex::new(None),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a text frame without waiting.
    ///
    /// Returns `false` if the channel is full or closed, or the connection is
    /// already closing, and increments the dropped message counter.
    pub fn send(&self, message: Arc<str>) -> bool {
        if !self.is_closing() && self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the session task to send a close frame and end the session.
    ///
    /// Returns `false` if the connection was already closing.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        {
            let mut request = self.close_request.lock();
            if request.is_some() || self.closing.is_cancelled() {
                return false;
            }
            *request = Some(CloseRequest {
                code,
                reason: reason.to_string(),
            });
        }
        self.closing.cancel();
        true
    }

    /// Whether [`close`](Self::close) was called (or the session ended).
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Resolves once the connection starts closing.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closing.cancelled()
    }

    /// Take the pending close frame, if one was requested.
    pub fn take_close_request(&self) -> Option<CloseRequest> {
        self.close_request.lock().take()
    }

    /// Mark the connection closed without sending a close frame.
    pub fn mark_closed(&self) {
        self.closing.cancel();
    }

    /// Store the serialized session attachment.
    pub fn serialize_attachment(&self, attachment: String) {
        *self.attachment.lock() = Some(attachment);
    }

    /// The serialized session attachment, if one was written.
    pub fn attachment(&self) -> Option<String> {
        self.attachment.lock().clone()
    }

    /// Mark the connection as alive (pong or any frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}
