//! Wire protocol: JSON text frames in both directions.
//!
//! Client → server frames are decoded in two steps (`type` first, then the
//! payload for that type) so an unknown `type` can be told apart from a
//! broken frame. Extra fields are ignored, which is how client-supplied
//! `id`, `timestamp` and `username` on a `message` frame get dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::FrameError;

/// Display name used for connections that send a message before joining.
pub const ANONYMOUS: &str = "Anonymous";

/// A decoded client → server frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    /// `{"type":"join","username":...}`
    Join { username: String },
    /// `{"type":"message","message":...}`
    Message { message: String },
}

#[derive(Deserialize)]
struct JoinPayload {
    username: String,
}

#[derive(Deserialize)]
struct MessagePayload {
    message: String,
}

/// Decode one raw frame.
pub fn decode_frame(raw: &[u8]) -> Result<ClientFrame, FrameError> {
    let value: Value = serde_json::from_slice(raw).map_err(FrameError::Malformed)?;
    let Some(object) = value.as_object() else {
        return Err(FrameError::NotAnObject);
    };
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_owned();

    match kind.as_str() {
        "join" => {
            let payload: JoinPayload = serde_json::from_value(value)
                .map_err(|source| FrameError::InvalidPayload { kind: "join", source })?;
            let username = payload.username.trim();
            if username.is_empty() {
                return Err(FrameError::BlankField("username"));
            }
            Ok(ClientFrame::Join {
                username: username.to_owned(),
            })
        }
        "message" => {
            let payload: MessagePayload = serde_json::from_value(value)
                .map_err(|source| FrameError::InvalidPayload { kind: "message", source })?;
            Ok(ClientFrame::Message {
                message: payload.message,
            })
        }
        _ => Err(FrameError::UnknownType(kind)),
    }
}

/// Membership change announced to peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceKind {
    Joined,
    Left,
}

/// A server → client event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "userJoined")]
    UserJoined { username: String },

    #[serde(rename = "userLeft")]
    UserLeft { username: String },

    /// Canonical chat message. `id` and `timestamp` are always server-assigned.
    #[serde(rename = "message")]
    Message {
        id: u64,
        username: String,
        message: String,
        timestamp: String,
    },
}

impl ServerEvent {
    pub fn presence(kind: PresenceKind, username: impl Into<String>) -> Self {
        let username = username.into();
        match kind {
            PresenceKind::Joined => Self::UserJoined { username },
            PresenceKind::Left => Self::UserLeft { username },
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserJoined { .. } => "userJoined",
            Self::UserLeft { .. } => "userLeft",
            Self::Message { .. } => "message",
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::UserJoined { username }
            | Self::UserLeft { username }
            | Self::Message { username, .. } => username,
        }
    }

    /// Serialize to the text frame sent to clients.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
