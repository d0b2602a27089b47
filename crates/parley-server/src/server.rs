//! Relay startup: bind both endpoints, spawn the hub, serve.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http;
use crate::hub::{spawn_hub, HubHandle, HUB_QUEUE};
use crate::listener::{bind_endpoint, TransportListener};
use crate::registry::Registry;
use crate::shutdown::ShutdownCoordinator;

/// Handle to a running relay.
#[derive(Debug)]
pub struct ServerHandle {
    ws_addr: SocketAddr,
    http_addr: SocketAddr,
    hub: HubHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound WebSocket address.
    pub fn ws_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    /// Bound health endpoint address.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Hub and endpoint tasks, for [`ShutdownCoordinator::graceful_shutdown`].
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

/// Bind both endpoints and start serving.
///
/// Either endpoint failing to bind is returned before anything is spawned.
/// Everything stops when `shutdown` fires.
pub async fn start(
    config: ServerConfig,
    shutdown: &ShutdownCoordinator,
) -> Result<ServerHandle, ServerError> {
    let ws = TransportListener::bind(config.ws_bind_addr()).await?;
    let http_listener = bind_endpoint("http", config.http_bind_addr()).await?;
    let ws_addr = ws.local_addr();
    let http_addr = http_listener.local_addr()?;

    let token = shutdown.token();
    let (hub, hub_task) = spawn_hub(Registry::new(), HUB_QUEUE, token.clone());
    let config = Arc::new(config);

    let ws_task = {
        let hub = hub.clone();
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = ws.serve(hub, config, token).await {
                error!(error = %e, "websocket endpoint stopped");
            }
        })
    };

    let http_task = {
        let app = http::router(hub.clone(), Instant::now());
        tokio::spawn(async move {
            info!(addr = %http_addr, "http endpoint listening");
            let result = axum::serve(http_listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "http endpoint stopped");
            }
        })
    };

    info!(ws = %ws_addr, http = %http_addr, "relay ready");
    Ok(ServerHandle {
        ws_addr,
        http_addr,
        hub,
        tasks: vec![hub_task, ws_task, http_task],
    })
}
