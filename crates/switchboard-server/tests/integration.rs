//! End-to-end tests over a real listener with a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use switchboard_server::{Broker, LiveConnections, ServerConfig, SwitchboardServer};
use switchboard_store::{SqliteKeepaliveRegistrar, open_in_memory};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Harness {
    server: SwitchboardServer,
    http: reqwest::Client,
    base: String,
    ws_base: String,
}

impl Harness {
    async fn boot() -> Self {
        let pool = open_in_memory().unwrap();
        let live = LiveConnections::new();
        let (broker, _task) = Broker::spawn(pool.clone(), live.clone(), 256).unwrap();
        let registrar = Arc::new(SqliteKeepaliveRegistrar::new(pool));
        let server = SwitchboardServer::new(ServerConfig::default(), broker, registrar, live);
        let (addr, _handle) = server.listen().await.unwrap();
        Self {
            server,
            http: reqwest::Client::new(),
            base: format!("http://{addr}"),
            ws_base: format!("ws://{addr}/api/connection"),
        }
    }

    async fn connect(&self, query: &str) -> WsStream {
        let (ws, _) = timeout(TIMEOUT, connect_async(format!("{}?{query}", self.ws_base)))
            .await
            .unwrap()
            .unwrap();
        ws
    }

    async fn get(&self, path: &str) -> Value {
        self.http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> Value {
        self.http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll `path` until `done` accepts the body.
    async fn wait_for(&self, path: &str, done: impl Fn(&Value) -> bool) -> Value {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let body = self.get(path).await;
            if done(&body) {
                return body;
            }
            assert!(tokio::time::Instant::now() < deadline, "timed out on {path}: {body}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_for_connections(&self, group: &str, n: u64) -> Value {
        self.wait_for("/api/status", |s| {
            s[group]["connections"].as_u64() == Some(n)
        })
        .await
    }
}

/// Next text frame, skipping control frames.
async fn recv_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        match msg {
            Message::Text(t) => return t.to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Read until a close frame arrives and return its code and reason.
async fn recv_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Close(frame) = msg {
            let frame = frame.expect("close frame without payload");
            return (u16::from(frame.code), frame.reason.as_str().to_string());
        }
    }
}

#[tokio::test]
async fn connect_shows_up_in_status() {
    let h = Harness::boot().await;
    let _ws = h.connect("group=A&version=2.1").await;

    let status = h.wait_for_connections("A", 1).await;
    let session = &status["A"]["sessions"][0];
    assert_eq!(session["version"], "2.1");
    assert_eq!(session["sourceAddress"], "127.0.0.1");
    assert!(session["connectedAt"].as_i64().unwrap() > 0);

    let health = h.get("/health").await;
    assert_eq!(health["groups"], 1);
    assert_eq!(health["connections"], 1);
}

#[tokio::test]
async fn missing_group_uses_default() {
    let h = Harness::boot().await;
    let _ws = h.connect("version=1").await;
    let _ = h.wait_for_connections("default", 1).await;
}

#[tokio::test]
async fn forwarded_for_header_sets_source_address() {
    let h = Harness::boot().await;
    let mut request = format!("{}?uuid=B", h.ws_base).into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.4, 10.0.0.1".parse().unwrap());
    let (_ws, _) = connect_async(request).await.unwrap();

    let status = h.wait_for_connections("B", 1).await;
    assert_eq!(status["B"]["sessions"][0]["sourceAddress"], "198.51.100.4");
}

#[tokio::test]
async fn push_reaches_only_the_group() {
    let h = Harness::boot().await;
    let mut a = h.connect("group=A").await;
    let mut b = h.connect("group=B").await;
    let _ = h.wait_for_connections("A", 1).await;
    let _ = h.wait_for_connections("B", 1).await;

    let resp = h.post("/api/push?group=A", json!({"cmd": "run"})).await;
    assert_eq!(resp["sent"], 1);
    assert_eq!(recv_text(&mut a).await, r#"{"cmd":"run"}"#);

    let resp = h.post("/api/broadcast", json!("all")).await;
    assert_eq!(resp["sent"], 2);
    assert_eq!(recv_text(&mut a).await, "\"all\"");
    assert_eq!(recv_text(&mut b).await, "\"all\"");
}

#[tokio::test]
async fn text_ping_is_answered_with_pong() {
    let h = Harness::boot().await;
    let mut ws = h.connect("group=A").await;
    ws.send(Message::text("ping")).await.unwrap();
    assert_eq!(recv_text(&mut ws).await, "pong");

    let messages = h.get("/api/messages").await;
    assert_eq!(messages, json!([]));
}

#[tokio::test]
async fn inbound_messages_are_recorded() {
    let h = Harness::boot().await;
    let mut ws = h.connect("group=A").await;
    ws.send(Message::text(r#"{"status":"idle"}"#)).await.unwrap();
    ws.send(Message::binary(br#"{"status":"busy"}"#.to_vec()))
        .await
        .unwrap();
    ws.send(Message::text("not json")).await.unwrap();

    let messages = h
        .wait_for("/api/messages?group=A", |m| {
            m.as_array().is_some_and(|a| a.len() == 2)
        })
        .await;
    assert_eq!(messages[0]["group"], "A");
    assert_eq!(messages[0]["payload"], json!({"status": "idle"}));
    assert_eq!(messages[1]["payload"], json!({"status": "busy"}));
}

#[tokio::test]
async fn keepalive_registration_is_not_recorded() {
    let h = Harness::boot().await;
    let mut ws = h.connect("group=A").await;
    ws.send(Message::text(
        r#"{"type":"keepalive","data":"http://a.example/ping"}"#,
    ))
    .await
    .unwrap();

    let keepalive = h
        .wait_for("/api/keepalive", |k| k.get("A").is_some())
        .await;
    assert_eq!(keepalive["A"], "http://a.example/ping");
    assert_eq!(h.get("/api/messages").await, json!([]));
}

#[tokio::test]
async fn kick_closes_with_normal_code() {
    let h = Harness::boot().await;
    let mut first = h.connect("group=A").await;
    let mut second = h.connect("group=A").await;
    let _other = h.connect("group=B").await;
    let _ = h.wait_for_connections("A", 2).await;
    let _ = h.wait_for_connections("B", 1).await;

    let resp = h.get("/api/kick?group=A").await;
    assert_eq!(resp["ok"], true);

    assert_eq!(recv_close(&mut first).await, (1000, "kicked".to_string()));
    assert_eq!(recv_close(&mut second).await, (1000, "kicked".to_string()));

    let status = h.wait_for("/api/status", |s| s.get("A").is_none()).await;
    assert_eq!(status["B"]["connections"], 1);
}

#[tokio::test]
async fn client_disconnect_removes_session() {
    let h = Harness::boot().await;
    let mut ws = h.connect("group=A").await;
    let _ = h.wait_for_connections("A", 1).await;

    ws.close(None).await.unwrap();
    let _ = h.wait_for("/api/status", |s| s.get("A").is_none()).await;
    assert!(h.server.live().is_empty());
}

#[tokio::test]
async fn group_config_is_merged_over_base() {
    let h = Harness::boot().await;
    let _ = h
        .post(
            "/api/config",
            json!({"base": {"poll": 10, "mode": "a"}, "A": {"mode": "b"}}),
        )
        .await;
    assert_eq!(
        h.get("/api/config?group=A").await,
        json!({"poll": 10, "mode": "b"})
    );
    assert_eq!(
        h.get("/api/config?group=Z").await,
        json!({"poll": 10, "mode": "a"})
    );
}

#[tokio::test]
async fn shutdown_closes_sessions_with_going_away() {
    let h = Harness::boot().await;
    let mut ws = h.connect("group=A").await;
    let _ = h.wait_for_connections("A", 1).await;

    h.server.shutdown().trigger();
    let (code, _) = recv_close(&mut ws).await;
    assert_eq!(code, 1001);
}

#[tokio::test]
async fn unavailable_broker_closes_upgrade_and_forgets_it() {
    let pool = open_in_memory().unwrap();
    let live = LiveConnections::new();
    let (broker, task) = Broker::spawn(pool.clone(), live.clone(), 4).unwrap();
    task.abort();
    let _ = task.await;
    let registrar = Arc::new(SqliteKeepaliveRegistrar::new(pool));
    let server = SwitchboardServer::new(ServerConfig::default(), broker, registrar, live);
    let (addr, _handle) = server.listen().await.unwrap();

    let (mut ws, _) = timeout(
        TIMEOUT,
        connect_async(format!("ws://{addr}/api/connection?group=A")),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(
        recv_close(&mut ws).await,
        (1011, "broker unavailable".to_string())
    );
    assert!(server.live().is_empty());
}
