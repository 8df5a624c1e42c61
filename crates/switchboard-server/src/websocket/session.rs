//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use switchboard_core::ConnectionId;
use switchboard_core::constants::{PROBE_PING, PROBE_PONG};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use crate::broker::BrokerHandle;
use crate::dispatcher::Dispatcher;
use crate::live::LiveConnections;
use crate::registry::SessionMetadata;

/// Close code sent to clients when the server shuts down.
const GOING_AWAY: u16 = 1001;

/// Close code sent when the broker cannot register the session.
const INTERNAL_ERROR: u16 = 1011;

/// Everything a session task needs besides the socket.
#[derive(Clone)]
pub struct SessionContext {
    /// Broker the session registers with.
    pub broker: BrokerHandle,
    /// Router for inbound frames.
    pub dispatcher: Arc<Dispatcher>,
    /// Transport-level set of open connections.
    pub live: LiveConnections,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the session is dropped.
    pub pong_timeout: Duration,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
}

type WsSink = SplitSink<WebSocket, Message>;

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the broker, then with the live set
/// 2. Answers `ping` text probes with `pong` without involving the broker
/// 3. Dispatches other text (and UTF-8 binary) frames
/// 4. Forwards outbound messages and sends periodic Ping frames
/// 5. Unregisters on disconnect, kick, prune, timeout, or shutdown
#[instrument(skip_all, fields(conn_id = %id, group = %group))]
pub async fn run_ws_session(
    mut ws: WebSocket,
    id: ConnectionId,
    group: String,
    metadata: SessionMetadata,
    ctx: SessionContext,
) {
    let (send_tx, send_rx) = mpsc::channel::<Arc<str>>(ctx.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(id.clone(), send_tx));

    // Live before registered, so a broker rebuild in between still sees it.
    ctx.live.add(connection.clone());
    if let Err(e) = ctx.broker.connect(&group, connection.clone(), metadata).await {
        warn!(error = %e, "failed to register session");
        connection.mark_closed();
        let _ = ctx.live.remove(&id);
        let frame = CloseFrame {
            code: INTERNAL_ERROR,
            reason: "broker unavailable".into(),
        };
        let _ = ws.send(Message::Close(Some(frame))).await;
        return;
    }
    info!("client connected");

    let (ws_tx, mut ws_rx) = ws.split();
    let mut outbound = tokio::spawn(forward_outbound(
        ws_tx,
        send_rx,
        connection.clone(),
        ctx.ping_interval,
        ctx.pong_timeout,
        ctx.shutdown.clone(),
    ));
    let mut outbound_finished = false;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(Ok(msg)) = frame else { break };
                connection.mark_alive();
                let text = match msg {
                    Message::Text(t) => {
                        if t.as_str() == PROBE_PING {
                            let _ = connection.send(Arc::from(PROBE_PONG));
                            continue;
                        }
                        t.to_string()
                    }
                    Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                let _ = ctx.dispatcher.dispatch(&group, &text).await;
            }
            _ = &mut outbound => {
                outbound_finished = true;
                break;
            }
        }
    }

    connection.mark_closed();
    if !outbound_finished {
        outbound.abort();
    }
    let _ = ctx.live.remove(&id);
    if let Err(e) = ctx.broker.disconnect(&id).await {
        debug!(error = %e, "broker gone before disconnect");
    }
    info!(dropped = connection.drop_count(), "client disconnected");
}

/// Drain the outbound queue into the socket until the connection closes.
async fn forward_outbound(
    mut ws_tx: WsSink,
    mut send_rx: mpsc::Receiver<Arc<str>>,
    connection: Arc<ClientConnection>,
    ping_interval: Duration,
    pong_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_ref().into())).await.is_err() {
                    break;
                }
            }
            () = connection.closed() => {
                finish(&mut ws_tx, &mut send_rx, &connection).await;
                break;
            }
            () = shutdown.cancelled() => {
                let _ = connection.close(GOING_AWAY, "server shutting down");
                finish(&mut ws_tx, &mut send_rx, &connection).await;
                break;
            }
            _ = ping.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > pong_timeout {
                    warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Flush what was queued before the close request, then send the close frame.
async fn finish(
    ws_tx: &mut WsSink,
    send_rx: &mut mpsc::Receiver<Arc<str>>,
    connection: &ClientConnection,
) {
    while let Ok(text) = send_rx.try_recv() {
        if ws_tx.send(Message::Text(text.as_ref().into())).await.is_err() {
            return;
        }
    }
    if let Some(request) = connection.take_close_request() {
        debug!(code = request.code, reason = %request.reason, "closing connection");
        let frame = CloseFrame {
            code: request.code,
            reason: request.reason.into(),
        };
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
    }
}
