//! Configuration for the `FleetLink` server.

use std::time::Duration;

/// Top-level network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for an HTTP request to complete.
    pub request_timeout: Duration,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// Outbound RPC settings.
    pub rpc: RpcConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(60),
            connection: ConnectionConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

/// Per-connection settings controlling outbound backpressure.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded mpsc channel capacity for outbound frames per connection.
    pub outbound_channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
        }
    }
}

/// Settings for calls and notifications issued to nodes.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Deadline applied to a call when the caller does not supply one.
    pub default_call_timeout: Duration,
    /// Maximum time to wait for space in a connection's outbound channel.
    pub send_timeout: Duration,
    /// When a node's connection tears down, fail its still-pending calls
    /// immediately instead of letting each wait out its own timeout.
    pub fail_pending_on_disconnect: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_call_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(5),
            fail_pending_on_disconnect: true,
        }
    }
}
