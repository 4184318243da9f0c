//! Server configuration.

use shoaldb_core::Credentials;
use shoaldb_protocol::DEFAULT_MAX_FRAME_SIZE;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 5433;

/// Configuration for the TCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Largest accepted request frame, in bytes.
    pub max_frame_size: usize,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections idle this long are closed (zero = never).
    pub idle_timeout: Duration,
    /// Users a connection must log in as; `None` leaves connections open.
    pub credentials: Option<Arc<Credentials>>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            credentials: None,
        }
    }

    /// Sets the maximum request frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Sets the maximum concurrent connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Requires every connection to log in before other verbs.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }
}
