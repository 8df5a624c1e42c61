//! `SwitchboardServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use switchboard_core::ConnectionId;
use switchboard_core::constants::DEFAULT_GROUP;
use switchboard_store::{KeepaliveMap, KeepaliveRegistrar, MessageRecord};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::broker::BrokerHandle;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ApiError, ApiResult};
use crate::health::HealthResponse;
use crate::live::LiveConnections;
use crate::registry::SessionMetadata;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broker handle.
    pub broker: BrokerHandle,
    /// Keepalive URL store.
    pub registrar: Arc<dyn KeepaliveRegistrar>,
    /// Open transport connections.
    pub live: LiveConnections,
    /// Handed to every new session task.
    pub session: SessionContext,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
}

/// The main Switchboard server.
pub struct SwitchboardServer {
    config: Arc<ServerConfig>,
    broker: BrokerHandle,
    registrar: Arc<dyn KeepaliveRegistrar>,
    live: LiveConnections,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl SwitchboardServer {
    /// Create a new server around a running broker.
    pub fn new(
        config: ServerConfig,
        broker: BrokerHandle,
        registrar: Arc<dyn KeepaliveRegistrar>,
        live: LiveConnections,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(broker.clone(), registrar.clone()));
        Self {
            config: Arc::new(config),
            broker,
            registrar,
            live,
            dispatcher,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broker: self.broker.clone(),
            registrar: self.registrar.clone(),
            live: self.live.clone(),
            session: SessionContext {
                broker: self.broker.clone(),
                dispatcher: self.dispatcher.clone(),
                live: self.live.clone(),
                send_queue_capacity: self.config.send_queue_capacity,
                ping_interval: self.config.ping_interval(),
                pong_timeout: self.config.pong_timeout(),
                shutdown: self.shutdown.token(),
            },
            config: self.config.clone(),
            start_time: self.start_time,
        };

        let admin = Router::new()
            .route("/api/status", get(status_handler))
            .route("/api/push", post(push_handler))
            .route("/api/broadcast", post(broadcast_handler))
            .route("/api/config", get(get_config_handler).post(update_config_handler))
            .route(
                "/api/config/raw",
                get(get_raw_config_handler).post(set_raw_config_handler),
            )
            .route("/api/kick", get(kick_handler))
            .route("/api/messages", get(messages_handler))
            .route("/api/storage", delete(reset_storage_handler))
            .route("/api/keepalive", get(keepalive_handler))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

        Router::new()
            .route("/health", get(health_handler))
            .route("/api/connection", get(connection_handler))
            .merge(admin)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
        });
        info!(%addr, "switchboard listening");
        Ok((addr, handle))
    }

    /// Get the broker handle.
    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }

    /// Get the live connection set.
    pub fn live(&self) -> &LiveConnections {
        &self.live
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

// ── auth ────────────────────────────────────────────────────────────

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.config.auth_token.as_deref() {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if presented != Some(expected) {
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

// ── query / body helpers ────────────────────────────────────────────

/// `?group=` with the legacy `?uuid=` alias.
#[derive(Debug, Default, Deserialize)]
struct GroupQuery {
    group: Option<String>,
    uuid: Option<String>,
}

impl GroupQuery {
    fn requested(&self) -> Option<&str> {
        [&self.group, &self.uuid]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|g| !g.is_empty())
    }

    fn group_or_default(&self) -> &str {
        self.requested().unwrap_or(DEFAULT_GROUP)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConnectQuery {
    group: Option<String>,
    uuid: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResetQuery {
    confirm: Option<String>,
}

fn parse_json(body: &Bytes) -> ApiResult<Value> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

fn parse_object(body: &Bytes) -> ApiResult<Map<String, Value>> {
    match parse_json(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::bad_request("body must be a JSON object")),
    }
}

fn ok() -> Json<Value> {
    Json(json!({ "ok": true }))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First `X-Forwarded-For` entry, else `X-Real-IP`, else the TCP peer.
fn source_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').map(str::trim).find(|s| !s.is_empty()))
        .or_else(|| header_value(headers, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

// ── handlers ────────────────────────────────────────────────────────

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.broker.counts().await {
        Ok(counts) => (
            StatusCode::OK,
            Json(HealthResponse::ok(state.start_time, counts)),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::unavailable(state.start_time, state.live.len())),
        ),
    }
}

/// GET /api/connection
async fn connection_handler(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    extensions: Extensions,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(%rejection, "non-upgrade request on connection endpoint");
            return ApiError::bad_request("expected a WebSocket upgrade").into_response();
        }
    };

    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let group = GroupQuery {
        group: query.group,
        uuid: query.uuid,
    }
    .group_or_default()
    .to_string();
    let version = query.version.filter(|v| !v.is_empty());
    let metadata = SessionMetadata::now(version, source_address(&headers, peer));
    let id = ConnectionId::new();
    let ctx = state.session.clone();

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, id, group, metadata, ctx))
}

/// GET /api/status
async fn status_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let status = state.broker.status().await?;
    Ok(Json(json!(status)))
}

/// POST /api/push?group=G
async fn push_handler(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let message = parse_json(&body)?;
    let sent = state
        .broker
        .push(query.group_or_default(), message)
        .await?;
    Ok(Json(json!({ "sent": sent })))
}

/// POST /api/broadcast
async fn broadcast_handler(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let message = parse_json(&body)?;
    let sent = state.broker.broadcast(message).await?;
    Ok(Json(json!({ "sent": sent })))
}

/// GET /api/config?group=G
async fn get_config_handler(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> ApiResult<Json<Value>> {
    let config = state.broker.config(query.group_or_default()).await?;
    Ok(Json(Value::Object(config)))
}

/// POST /api/config
async fn update_config_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let partial = parse_object(&body)?;
    state.broker.update_config(partial).await?;
    Ok(ok())
}

/// GET /api/config/raw
async fn get_raw_config_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(Value::Object(state.broker.raw_config().await?)))
}

/// POST /api/config/raw
async fn set_raw_config_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let document = parse_object(&body)?;
    state.broker.set_raw_config(document).await?;
    Ok(ok())
}

/// GET /api/kick?group=G
async fn kick_handler(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> ApiResult<Json<Value>> {
    let _ = state.broker.kick(query.group_or_default()).await?;
    Ok(ok())
}

/// GET /api/messages[?group=G]
async fn messages_handler(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> ApiResult<Json<Vec<MessageRecord>>> {
    Ok(Json(state.broker.messages(query.requested()).await?))
}

/// DELETE /api/storage?confirm=confirm
async fn reset_storage_handler(
    State(state): State<AppState>,
    Query(query): Query<ResetQuery>,
) -> ApiResult<Json<Value>> {
    state
        .broker
        .reset(query.confirm.as_deref().unwrap_or_default())
        .await?;
    state.registrar.clear().await?;
    info!("storage reset");
    Ok(ok())
}

/// GET /api/keepalive
async fn keepalive_handler(State(state): State<AppState>) -> ApiResult<Json<KeepaliveMap>> {
    Ok(Json(state.registrar.all().await?))
}
