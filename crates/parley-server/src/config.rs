//! Runtime configuration for the relay server.

use std::time::Duration;

use parley_settings::ServerSettings;

/// Resolved server configuration with durations instead of raw millis.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// WebSocket endpoint port. `0` picks a free port.
    pub ws_port: u16,
    /// Health endpoint port. `0` picks a free port.
    pub http_port: u16,
    pub max_send_queue: usize,
    pub max_message_size: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Loopback with OS-assigned ports on both endpoints.
    pub fn ephemeral() -> Self {
        Self {
            host: "127.0.0.1".into(),
            ws_port: 0,
            http_port: 0,
            ..Self::default()
        }
    }

    pub fn ws_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }

    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            ws_port: s.ws_port,
            http_port: s.http_port,
            max_send_queue: s.max_send_queue.max(1),
            max_message_size: s.max_message_size,
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(s.heartbeat_timeout_ms),
            shutdown_timeout: Duration::from_millis(s.shutdown_timeout_ms),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}
