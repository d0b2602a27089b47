//! One accepted WebSocket peer, as seen by the registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use parley_core::ConnectionId;
use tokio::sync::mpsc;

/// Liveness of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting sends.
    Open,
    /// Teardown started; queued frames drain, nothing new is accepted.
    Closing,
    /// Socket tasks have finished.
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closing => 1,
            Self::Closed => 2,
        }
    }
}

/// Why a send did not enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
    #[error("outbound queue is full")]
    Full,
}

/// A connected peer: identity, liveness, and the sending half of its
/// outbound queue. The transport's writer task owns the receiving half.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    state: AtomicU8,
    /// `None` once closing has begun, which ends the writer task.
    tx: Mutex<Option<mpsc::Sender<String>>>,
    connected_at: Instant,
    last_pong: Mutex<Instant>,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` frames.
    pub fn new(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let conn = Self {
            id,
            remote_addr,
            state: AtomicU8::new(ConnectionState::Open.as_u8()),
            tx: Mutex::new(Some(tx)),
            connected_at: now,
            last_pong: Mutex::new(now),
        };
        (conn, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Enqueue a text frame without waiting.
    pub fn send(&self, text: String) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(SendError::Closed);
        };
        tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Start teardown: `Open → Closing` and release the outbound sender so
    /// the writer drains, sends a Close frame, and exits.
    ///
    /// Returns `false` if the connection was already closing or closed.
    pub fn begin_close(&self) -> bool {
        let began = self
            .state
            .compare_exchange(
                ConnectionState::Open.as_u8(),
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        drop(self.tx.lock().take());
        began
    }

    /// Terminal state, set by the transport once both socket halves are done.
    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
        drop(self.tx.lock().take());
    }

    /// Record a Pong (or any inbound activity).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
