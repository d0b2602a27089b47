//! Participant table and broadcast protocol.
//!
//! The registry is a plain owned value; it is not `Sync` and never shared.
//! [`crate::hub`] owns the single instance and feeds it one command at a
//! time, which is what makes each frame's table mutation and fan-out atomic
//! relative to every other frame.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parley_core::{
    decode_frame, iso_timestamp, ClientFrame, ConnectionId, MessageIdSource, PresenceKind,
    ServerEvent, ANONYMOUS,
};
use tracing::{debug, info, warn};

use crate::connection::{Connection, SendError};

/// A connection and the name it announced, if any.
#[derive(Debug)]
pub struct Participant {
    connection: Arc<Connection>,
    display_name: Option<String>,
}

impl Participant {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Name set by the last `join`, `None` before the first one.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Name used on the wire.
    pub fn resolved_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(ANONYMOUS)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
}

/// What a single inbound frame resulted in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// `userJoined` sent to every other open connection.
    Joined { username: String, recipients: usize },
    /// Canonical `message` sent to every open connection, sender included.
    Relayed { id: u64, recipients: usize },
    /// Frame discarded; the connection stays open.
    Rejected { kind: &'static str },
    /// The connection is no longer (or never was) in the table.
    UnknownConnection,
}

/// What removing a connection resulted in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// `userLeft` sent to the remaining connections.
    Announced { username: String, recipients: usize },
    /// The connection never joined, so nobody is told.
    Silent,
    UnknownConnection,
}

/// Why a connection is leaving the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport reported close or error.
    Transport,
    /// A broadcast could not be delivered.
    DeliveryFailed(SendError),
}

/// Counters for the health endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Open connections in the table.
    pub connections: usize,
    /// Connections that have sent `join`.
    pub participants: usize,
}

/// The authoritative set of open connections and their display names.
#[derive(Debug, Default)]
pub struct Registry {
    participants: HashMap<ConnectionId, Participant>,
    ids: MessageIdSource,
    /// Peers whose send failed during a broadcast, removed once it completes.
    pending_evictions: VecDeque<(ConnectionId, SendError)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted connection. Nothing is broadcast until it joins.
    pub fn on_connect(&mut self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        let id = connection.id().clone();
        if self.participants.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }
        debug!(conn_id = %id, remote = ?connection.remote_addr(), "connection registered");
        let _ = self.participants.insert(
            id,
            Participant {
                connection,
                display_name: None,
            },
        );
        Ok(())
    }

    /// Interpret one raw frame from `id` and fan out the result.
    pub fn on_frame(&mut self, id: &ConnectionId, raw: &[u8]) -> FrameOutcome {
        if !self.participants.contains_key(id) {
            debug!(conn_id = %id, len = raw.len(), "frame from unregistered connection dropped");
            return FrameOutcome::UnknownConnection;
        }

        let frame = match decode_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_forward_compatible() {
                    debug!(conn_id = %id, error = %e, "ignoring frame");
                } else {
                    warn!(conn_id = %id, kind = e.error_kind(), error = %e, "discarding malformed frame");
                }
                return FrameOutcome::Rejected { kind: e.error_kind() };
            }
        };

        let outcome = match frame {
            ClientFrame::Join { username } => self.join(id, username),
            ClientFrame::Message { message } => self.relay(id, message),
        };
        self.settle();
        outcome
    }

    /// Remove `id` after the transport reports close or error.
    pub fn on_disconnect(&mut self, id: &ConnectionId) -> DisconnectOutcome {
        let outcome = self.remove(id, DisconnectReason::Transport);
        self.settle();
        outcome
    }

    /// Close every connection without announcing anything. Used at shutdown.
    pub fn close_all(&mut self) -> usize {
        let count = self.participants.len();
        for (_, participant) in self.participants.drain() {
            let _ = participant.connection.begin_close();
        }
        self.pending_evictions.clear();
        count
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.participants.len(),
            participants: self
                .participants
                .values()
                .filter(|p| p.display_name.is_some())
                .count(),
        }
    }

    pub fn participant(&self, id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    fn join(&mut self, id: &ConnectionId, username: String) -> FrameOutcome {
        let Some(participant) = self.participants.get_mut(id) else {
            return FrameOutcome::UnknownConnection;
        };
        let previous = participant.display_name.replace(username.clone());
        let event = ServerEvent::presence(PresenceKind::Joined, username.clone());
        let recipients = self.broadcast(&event, Some(id));
        match previous {
            Some(previous) => {
                info!(conn_id = %id, %previous, username = %username, recipients, "participant renamed");
            }
            None => info!(conn_id = %id, username = %username, recipients, "participant joined"),
        }
        FrameOutcome::Joined {
            username,
            recipients,
        }
    }

    fn relay(&mut self, id: &ConnectionId, message: String) -> FrameOutcome {
        let Some(participant) = self.participants.get(id) else {
            return FrameOutcome::UnknownConnection;
        };
        let username = participant.resolved_name().to_owned();
        let now = Utc::now();
        let message_id = self.ids.next_at(now);
        debug!(conn_id = %id, username = %username, body = %message, "relaying message");

        let event = ServerEvent::Message {
            id: message_id,
            username,
            message,
            timestamp: iso_timestamp(now),
        };
        let recipients = self.broadcast(&event, None);
        info!(conn_id = %id, username = event.username(), id = message_id, recipients, "message relayed");
        FrameOutcome::Relayed {
            id: message_id,
            recipients,
        }
    }

    fn remove(&mut self, id: &ConnectionId, reason: DisconnectReason) -> DisconnectOutcome {
        let Some(participant) = self.participants.remove(id) else {
            debug!(conn_id = %id, ?reason, "disconnect for unregistered connection ignored");
            return DisconnectOutcome::UnknownConnection;
        };
        let _ = participant.connection.begin_close();

        let Some(username) = participant.display_name else {
            debug!(conn_id = %id, ?reason, "connection left without joining");
            return DisconnectOutcome::Silent;
        };
        let recipients = self.broadcast(&ServerEvent::presence(PresenceKind::Left, username.clone()), None);
        info!(conn_id = %id, username = %username, ?reason, recipients, "participant disconnected");
        DisconnectOutcome::Announced {
            username,
            recipients,
        }
    }

    /// Send `event` to every connection in the table except `exclude`.
    ///
    /// Failed sends never abort the loop; the peer is queued for eviction.
    /// Returns the number of connections the event was enqueued for.
    fn broadcast(&mut self, event: &ServerEvent, exclude: Option<&ConnectionId>) -> usize {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(event_type = event.event_type(), error = %e, "failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        for (id, participant) in &self.participants {
            if exclude == Some(id) {
                continue;
            }
            match participant.connection.send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(conn_id = %id, error = %err, event_type = event.event_type(), "delivery failed, evicting");
                    self.pending_evictions.push_back((id.clone(), err));
                }
            }
        }
        debug!(event_type = event.event_type(), recipients = delivered, "broadcast");
        delivered
    }

    /// Run queued evictions through the disconnect path until none remain.
    fn settle(&mut self) {
        while let Some((id, err)) = self.pending_evictions.pop_front() {
            let _ = self.remove(&id, DisconnectReason::DeliveryFailed(err));
        }
    }
}
