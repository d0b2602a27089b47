//! End-to-end tests against a running relay with real WebSocket clients.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use parley_server::{start, ServerConfig, ServerError, ServerHandle, ShutdownCoordinator};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Relay {
    handle: ServerHandle,
    shutdown: ShutdownCoordinator,
}

impl Relay {
    async fn boot() -> Self {
        Self::boot_with(ServerConfig::ephemeral()).await
    }

    async fn boot_with(config: ServerConfig) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let handle = start(config, &shutdown).await.unwrap();
        Self { handle, shutdown }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.handle.ws_addr())
    }

    /// Connect and wait until the hub has registered the new connection.
    async fn connect(&self) -> WsStream {
        let before = self.connections().await;
        let (ws, _) = timeout(TIMEOUT, connect_async(self.ws_url()))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        self.wait_for_connections(before + 1).await;
        ws
    }

    async fn connections(&self) -> usize {
        self.handle.hub().stats().await.unwrap().connections
    }

    async fn wait_for_connections(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            if self.connections().await == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "never reached {expected} connections"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn join(ws: &mut WsStream, username: &str) {
    send_json(ws, &json!({"type": "join", "username": username})).await;
}

async fn say(ws: &mut WsStream, message: &str) {
    send_json(ws, &json!({"type": "message", "message": message})).await;
}

/// Next text frame as JSON, skipping control frames.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("read timed out")
            .expect("stream ended")
            .expect("read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn assert_quiet(ws: &mut WsStream) {
    loop {
        match timeout(QUIET, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            Ok(other) => panic!("expected no frames, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn join_announced_to_others_only() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    let mut bob = relay.connect().await;
    let mut carol = relay.connect().await;

    join(&mut alice, "alice").await;

    assert_eq!(read_json(&mut bob).await, json!({"type": "userJoined", "username": "alice"}));
    assert_eq!(read_json(&mut carol).await, json!({"type": "userJoined", "username": "alice"}));
    assert_quiet(&mut alice).await;
}

#[tokio::test]
async fn message_reaches_everyone_including_sender() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    let mut bob = relay.connect().await;
    join(&mut alice, "alice").await;
    let _ = read_json(&mut bob).await;

    say(&mut alice, "hello").await;

    let mine = read_json(&mut alice).await;
    let theirs = read_json(&mut bob).await;
    assert_eq!(mine, theirs);
    assert_eq!(mine["type"], "message");
    assert_eq!(mine["username"], "alice");
    assert_eq!(mine["message"], "hello");
    assert!(mine["id"].as_u64().is_some());
    let ts = mine["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok(), "bad timestamp {ts}");
}

#[tokio::test]
async fn message_before_join_is_anonymous() {
    let relay = Relay::boot().await;
    let mut ghost = relay.connect().await;
    say(&mut ghost, "boo").await;
    let event = read_json(&mut ghost).await;
    assert_eq!(event["username"], "Anonymous");
    assert_eq!(event["message"], "boo");
}

#[tokio::test]
async fn client_cannot_forge_authority_fields() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    join(&mut alice, "alice").await;
    send_json(
        &mut alice,
        &json!({"type": "message", "message": "hi", "username": "root", "id": 7, "timestamp": "x"}),
    )
    .await;
    let event = read_json(&mut alice).await;
    assert_eq!(event["username"], "alice");
    assert_ne!(event["id"], 7);
    assert_ne!(event["timestamp"], "x");
}

#[tokio::test]
async fn message_ids_increase() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    for i in 0..10 {
        say(&mut alice, &format!("m{i}")).await;
    }
    let mut last = 0;
    for i in 0..10 {
        let event = read_json(&mut alice).await;
        assert_eq!(event["message"], format!("m{i}"));
        let id = event["id"].as_u64().unwrap();
        assert!(id > last, "id {id} not after {last}");
        last = id;
    }
}

#[tokio::test]
async fn malformed_frames_dropped_connection_kept() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    let mut bob = relay.connect().await;

    alice.send(Message::text("not json")).await.unwrap();
    send_json(&mut alice, &json!({"type": "dance"})).await;
    send_json(&mut alice, &json!({"username": "nobody"})).await;
    send_json(&mut alice, &json!({"type": "join", "username": "   "})).await;

    assert_quiet(&mut bob).await;
    assert_quiet(&mut alice).await;
    assert_eq!(relay.connections().await, 2);

    say(&mut alice, "still here").await;
    assert_eq!(read_json(&mut bob).await["message"], "still here");
}

#[tokio::test]
async fn binary_frames_are_interpreted() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    let raw = json!({"type": "message", "message": "bytes"}).to_string();
    alice.send(Message::binary(raw.into_bytes())).await.unwrap();
    assert_eq!(read_json(&mut alice).await["message"], "bytes");
}

#[tokio::test]
async fn second_join_renames() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    let mut bob = relay.connect().await;

    join(&mut alice, "alice").await;
    join(&mut alice, "alicia").await;
    assert_eq!(read_json(&mut bob).await["username"], "alice");
    assert_eq!(read_json(&mut bob).await["username"], "alicia");

    say(&mut alice, "new name").await;
    assert_eq!(read_json(&mut bob).await["username"], "alicia");
}

#[tokio::test]
async fn left_announced_only_for_joined() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    let lurker = relay.connect().await;
    let mut carol = relay.connect().await;

    drop(lurker);
    relay.wait_for_connections(2).await;
    assert_quiet(&mut alice).await;

    join(&mut carol, "carol").await;
    assert_eq!(read_json(&mut alice).await["type"], "userJoined");

    carol.close(None).await.unwrap();
    relay.wait_for_connections(1).await;
    assert_eq!(read_json(&mut alice).await, json!({"type": "userLeft", "username": "carol"}));
    assert_quiet(&mut alice).await;
}

#[tokio::test]
async fn root_path_also_upgrades() {
    let relay = Relay::boot().await;
    let url = format!("ws://{}/", relay.handle.ws_addr());
    let (mut ws, _) = connect_async(url).await.unwrap();
    relay.wait_for_connections(1).await;
    say(&mut ws, "root").await;
    assert_eq!(read_json(&mut ws).await["message"], "root");
}

#[tokio::test]
async fn failed_handshake_does_not_affect_listener() {
    let relay = Relay::boot().await;
    let resp = reqwest::get(format!("http://{}/ws", relay.handle.ws_addr()))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());

    let mut alice = relay.connect().await;
    say(&mut alice, "fine").await;
    assert_eq!(read_json(&mut alice).await["message"], "fine");
}

#[tokio::test]
async fn health_reports_counts() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    let mut bob = relay.connect().await;
    join(&mut alice, "alice").await;
    let _ = read_json(&mut bob).await;

    let body: Value = reqwest::get(format!("http://{}/health", relay.handle.http_addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
    assert_eq!(body["participants"], 1);
    assert!(body["uptimeSecs"].as_u64().is_some());
}

#[tokio::test]
async fn occupied_ws_port_fails_startup() {
    let held = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = held.local_addr().unwrap().port();
    let config = ServerConfig {
        ws_port: port,
        ..ServerConfig::ephemeral()
    };
    let err = start(config, &ShutdownCoordinator::new()).await.unwrap_err();
    assert!(matches!(err, ServerError::Bind { endpoint: "websocket", .. }), "{err:?}");
}

#[tokio::test]
async fn occupied_http_port_fails_startup() {
    let held = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = held.local_addr().unwrap().port();
    let config = ServerConfig {
        http_port: port,
        ..ServerConfig::ephemeral()
    };
    let err = start(config, &ShutdownCoordinator::new()).await.unwrap_err();
    assert!(matches!(err, ServerError::Bind { endpoint: "http", .. }), "{err:?}");
}

#[tokio::test]
async fn server_pings_clients() {
    let relay = Relay::boot_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(50),
        ..ServerConfig::ephemeral()
    })
    .await;
    let mut ws = relay.connect().await;
    let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(msg, Message::Ping(_)), "{msg:?}");
}

#[tokio::test]
async fn silent_client_dropped_after_heartbeat_timeout() {
    let relay = Relay::boot_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_millis(200),
        ..ServerConfig::ephemeral()
    })
    .await;
    // never polled, so Pongs are never sent
    let _ws = relay.connect().await;
    relay.wait_for_connections(0).await;
}

#[tokio::test]
async fn shutdown_closes_clients_without_presence() {
    let relay = Relay::boot().await;
    let mut alice = relay.connect().await;
    let mut bob = relay.connect().await;
    join(&mut alice, "alice").await;
    let _ = read_json(&mut bob).await;

    let Relay { handle, shutdown } = relay;
    let _ = shutdown.graceful_shutdown(handle.into_tasks(), Some(TIMEOUT)).await;

    loop {
        match timeout(TIMEOUT, bob.next()).await.expect("bob never closed") {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(other)) => panic!("unexpected frame during shutdown: {other:?}"),
        }
    }
}
