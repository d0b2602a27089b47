//! The single task that owns the [`Registry`].
//!
//! Transport tasks never touch the participant table directly. They send
//! [`HubCommand`]s over one bounded channel and the hub applies them in
//! arrival order, one at a time.

use std::sync::Arc;

use parley_core::ConnectionId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connection::Connection;
use crate::error::ServerError;
use crate::registry::{Registry, RegistryStats};

/// Capacity of the command channel shared by all transport tasks.
pub const HUB_QUEUE: usize = 1024;

#[derive(Debug)]
pub enum HubCommand {
    Connect {
        connection: Arc<Connection>,
    },
    Frame {
        id: ConnectionId,
        raw: Vec<u8>,
    },
    Disconnect {
        id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}

/// Cloneable sender side of the hub.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn connect(&self, connection: Arc<Connection>) -> Result<(), ServerError> {
        self.send(HubCommand::Connect { connection }).await
    }

    pub async fn frame(&self, id: ConnectionId, raw: Vec<u8>) -> Result<(), ServerError> {
        self.send(HubCommand::Frame { id, raw }).await
    }

    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), ServerError> {
        self.send(HubCommand::Disconnect { id }).await
    }

    /// Snapshot of the table, taken between commands.
    pub async fn stats(&self) -> Result<RegistryStats, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| ServerError::HubClosed)
    }

    async fn send(&self, command: HubCommand) -> Result<(), ServerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ServerError::HubClosed)
    }
}

/// Spawn the hub task around `registry`.
///
/// The task exits when `shutdown` fires or every handle is dropped. On exit
/// every remaining connection is closed without any presence broadcast.
pub fn spawn_hub(
    registry: Registry,
    capacity: usize,
    shutdown: CancellationToken,
) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_hub(registry, rx, shutdown));
    (HubHandle { tx }, task)
}

async fn run_hub(
    mut registry: Registry,
    mut rx: mpsc::Receiver<HubCommand>,
    shutdown: CancellationToken,
) {
    debug!("hub started");
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => apply(&mut registry, command),
                None => break,
            },
        }
    }
    let closed = registry.close_all();
    info!(closed, "hub stopped");
}

fn apply(registry: &mut Registry, command: HubCommand) {
    match command {
        HubCommand::Connect { connection } => {
            if let Err(e) = registry.on_connect(connection) {
                error!(error = %e, "connection registration failed");
            }
        }
        HubCommand::Frame { id, raw } => {
            let _ = registry.on_frame(&id, &raw);
        }
        HubCommand::Disconnect { id } => {
            let _ = registry.on_disconnect(&id);
        }
        HubCommand::Stats { reply } => {
            let _ = reply.send(registry.stats());
        }
    }
}
