//! Configuration for remote connections.

use shoaldb_protocol::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Configuration for a [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for each TCP connect attempt.
    pub connect_timeout: Duration,
    /// Timeout for reading a response.
    pub read_timeout: Duration,
    /// Timeout for writing a request.
    pub write_timeout: Duration,
    /// Number of connect attempts before giving up.
    pub connect_attempts: u32,
    /// Delay between connect attempts, doubled after each failure.
    pub connect_backoff: Duration,
    /// Largest frame accepted in either direction, in bytes.
    pub max_frame_size: usize,
}

impl ClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(100),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the write timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the number of connect attempts (at least one is always made).
    #[must_use]
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    /// Sets the initial delay between connect attempts.
    #[must_use]
    pub fn with_connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = backoff;
        self
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Delay before connect attempt number `attempt` (zero-based).
    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.connect_backoff.saturating_mul(factor)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
    }

    #[test]
    fn backoff_doubles() {
        let config = ClientConfig::new().with_connect_backoff(Duration::from_millis(10));
        assert_eq!(config.backoff_for(1), Duration::from_millis(10));
        assert_eq!(config.backoff_for(2), Duration::from_millis(20));
        assert_eq!(config.backoff_for(3), Duration::from_millis(40));
    }

    #[test]
    fn backoff_saturates() {
        let config = ClientConfig::new().with_connect_backoff(Duration::from_secs(1));
        assert!(config.backoff_for(200) >= Duration::from_secs(1));
    }
}
