//! Client configuration.

use std::time::Duration;
use teletable_protocol::DEFAULT_PORT;

/// Reconnect backoff policy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial: Duration,
    /// Ceiling for the delay between attempts.
    pub max: Duration,
    /// Multiplier applied after each failed attempt.
    pub factor: u32,
    /// Fractional jitter applied to every delay (0.25 = plus/minus 25%).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2,
            jitter: 0.25,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address.
    pub server_host: String,
    /// Server TCP port.
    pub server_port: u16,
    /// Identity string sent in CLIENT_HELLO.
    pub client_ident: String,
    /// Idle interval after which a KEEP_ALIVE is written.
    pub keep_alive_interval: Duration,
    /// Deadline for an outstanding RPC call.
    pub rpc_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Reconnect automatically after an unexpected transport drop.
    pub reconnect: bool,
    /// Reconnect backoff policy.
    pub backoff: BackoffConfig,
    /// Capacity of the outbound submission queue.
    pub outbound_queue: usize,
}

impl ClientConfig {
    pub fn new(server_host: impl Into<String>) -> Self {
        Self {
            server_host: server_host.into(),
            server_port: DEFAULT_PORT,
            client_ident: String::new(),
            keep_alive_interval: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            reconnect: true,
            backoff: BackoffConfig::default(),
            outbound_queue: 256,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_client_ident(mut self, ident: impl Into<String>) -> Self {
        self.client_ident = ident.into();
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("10.0.0.2");
        assert_eq!(config.server_port, 1735);
        assert_eq!(config.client_ident, "");
        assert_eq!(config.keep_alive_interval, Duration::from_secs(1));
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert!(config.reconnect);
        assert_eq!(config.backoff.initial, Duration::from_millis(100));
        assert_eq!(config.backoff.max, Duration::from_secs(5));
        assert_eq!(config.backoff.factor, 2);
    }

    #[test]
    fn test_config_builders() {
        let config = ClientConfig::new("server.local")
            .with_port(2735)
            .with_client_ident("dashboard")
            .with_reconnect(false)
            .with_outbound_queue(0);
        assert_eq!(config.server_port, 2735);
        assert_eq!(config.client_ident, "dashboard");
        assert!(!config.reconnect);
        // Queue capacity is clamped to at least one slot.
        assert_eq!(config.outbound_queue, 1);
    }
}
