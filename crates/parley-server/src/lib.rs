//! Single-room chat relay over WebSocket.
//!
//! Every accepted connection becomes a [`connection::Connection`] with its own
//! bounded outbound queue. Inbound frames are handed to the [`hub`], the one
//! task that owns the [`registry::Registry`], so each join, message, or
//! departure updates the participant table and fans out before the next
//! frame is looked at.

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod hub;
pub mod listener;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use error::ServerError;
pub use hub::HubHandle;
pub use registry::{Registry, RegistryStats};
pub use server::{start, ServerHandle};
pub use shutdown::ShutdownCoordinator;
