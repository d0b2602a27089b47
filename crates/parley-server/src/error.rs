use std::io;

/// Errors surfaced by server startup and the hub handle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// An endpoint could not bind its address. Fatal at startup.
    #[error("failed to bind {endpoint} endpoint on {addr}: {source}")]
    Bind {
        endpoint: &'static str,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    /// The hub task has stopped and no longer accepts commands.
    #[error("relay hub has stopped")]
    HubClosed,
}

impl ServerError {
    pub(crate) fn bind(endpoint: &'static str, addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            endpoint,
            addr: addr.into(),
            source,
        }
    }
}
