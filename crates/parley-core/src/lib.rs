//! # parley-core
//!
//! Protocol types shared by the relay and its tests.
//!
//! - [`events`]: client frames and server events as they appear on the wire
//! - [`ids`]: branded identifiers
//! - [`sequence`]: server-authoritative message ids and timestamps

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod sequence;

pub use errors::FrameError;
pub use events::{decode_frame, ClientFrame, PresenceKind, ServerEvent, ANONYMOUS};
pub use ids::ConnectionId;
pub use sequence::{iso_timestamp, MessageIdSource};
