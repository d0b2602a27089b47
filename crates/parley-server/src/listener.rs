//! WebSocket transport: accept, upgrade, and pump frames to and from the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parley_core::ConnectionId;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::hub::HubHandle;

/// Ping cadence and the silence that ends a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&ServerConfig> for Heartbeat {
    fn from(config: &ServerConfig) -> Self {
        Self {
            interval: config.heartbeat_interval,
            timeout: config.heartbeat_timeout,
        }
    }
}

#[derive(Clone)]
struct WsState {
    hub: HubHandle,
    config: Arc<ServerConfig>,
}

/// Bind `addr` for `endpoint`, mapping failure to [`ServerError::Bind`].
pub(crate) async fn bind_endpoint(
    endpoint: &'static str,
    addr: String,
) -> Result<TcpListener, ServerError> {
    match TcpListener::bind(addr.as_str()).await {
        Ok(listener) => Ok(listener),
        Err(source) => Err(ServerError::bind(endpoint, addr, source)),
    }
}

/// The bound WebSocket endpoint.
#[derive(Debug)]
pub struct TransportListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TransportListener {
    pub async fn bind(addr: String) -> Result<Self, ServerError> {
        let listener = bind_endpoint("websocket", addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// A failed handshake only affects that peer; the accept loop keeps going.
    pub async fn serve(
        self,
        hub: HubHandle,
        config: Arc<ServerConfig>,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        info!(addr = %self.local_addr, "websocket endpoint listening");
        let app = router(hub, config);
        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    }
}

/// Upgrade routes. The relay answers on both `/` and `/ws`.
fn router(hub: HubHandle, config: Arc<ServerConfig>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(WsState { hub, config })
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<WsState>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(%remote, reason = %rejection, "rejected websocket handshake");
            return rejection.into_response();
        }
    };
    let limit = state.config.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(move |error| warn!(%remote, %error, "websocket upgrade failed"))
        .on_upgrade(move |socket| run_connection(socket, ConnectionId::new(), remote, state))
}

#[instrument(skip_all, fields(conn_id = %id, remote = %remote))]
async fn run_connection(socket: WebSocket, id: ConnectionId, remote: SocketAddr, state: WsState) {
    let (connection, outbound) =
        Connection::new(id.clone(), Some(remote), state.config.max_send_queue);
    let connection = Arc::new(connection);
    if state.hub.connect(Arc::clone(&connection)).await.is_err() {
        warn!("hub stopped, dropping connection");
        return;
    }
    info!("client connected");

    let (sink, stream) = socket.split();
    let heartbeat = Heartbeat::from(state.config.as_ref());
    let mut writer = tokio::spawn(
        write_loop(sink, outbound, Arc::clone(&connection), heartbeat).in_current_span(),
    );
    let mut reader = tokio::spawn(
        read_loop(stream, Arc::clone(&connection), state.hub.clone()).in_current_span(),
    );

    // Whichever side ends first takes the other down. Awaiting the aborted
    // task keeps every forwarded frame ahead of the disconnect below.
    tokio::select! {
        _ = &mut writer => {
            reader.abort();
            let _ = reader.await;
        }
        _ = &mut reader => {
            writer.abort();
            let _ = writer.await;
        }
    }

    connection.mark_closed();
    if state.hub.disconnect(id).await.is_err() {
        debug!("hub stopped before disconnect");
    }
    info!(
        age_secs = connection.age().as_secs(),
        "client disconnected"
    );
}

/// Drain the outbound queue into the socket and keep the heartbeat.
///
/// When the registry closes the queue, any frames still buffered are flushed
/// before the Close frame.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    connection: Arc<Connection>,
    heartbeat: Heartbeat,
) {
    let mut ping = interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(text) = next else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "websocket write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                let silent = connection.last_pong_elapsed();
                if silent > heartbeat.timeout {
                    warn!(silent_secs = silent.as_secs(), "heartbeat timed out");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Forward every text or binary frame to the hub until the peer goes away.
async fn read_loop(mut stream: SplitStream<WebSocket>, connection: Arc<Connection>, hub: HubHandle) {
    while let Some(next) = stream.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "websocket read error");
                break;
            }
        };
        connection.mark_alive();
        let raw = match message {
            Message::Text(text) => text.as_str().as_bytes().to_vec(),
            Message::Binary(bytes) => bytes.to_vec(),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if hub.frame(connection.id().clone(), raw).await.is_err() {
            break;
        }
    }
}
