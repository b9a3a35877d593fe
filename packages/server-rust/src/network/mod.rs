//! Networking: configuration, connection handles, the node registry, HTTP
//! and WebSocket handlers, middleware, and graceful shutdown.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::{ConnectionConfig, NetworkConfig, RpcConfig};
pub use connection::{NodeConnection, NodeRegistry, OutboundFrame, SendError};
pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::{HealthState, ShutdownController};
