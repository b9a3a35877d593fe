//! HTTP and WebSocket handler definitions for the `FleetLink` server.
//!
//! Defines `AppState` (the shared state carried through axum extractors)
//! and re-exports all handler functions for the router.

pub mod health;
pub mod nodes;
pub mod websocket;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use nodes::{
    call_node_handler, connection_status_handler, node_methods_handler, notify_node_handler,
};
pub use websocket::ws_upgrade_handler;

use std::sync::Arc;
use std::time::Instant;

use crate::rpc::NodeRpcService;
use crate::traits::NodeDirectory;

use super::{NetworkConfig, ShutdownController};

/// Shared application state passed to all axum handlers via `State`.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Gateway for RPC traffic to connected nodes.
    pub rpc: Arc<NodeRpcService>,
    /// Persistence collaborator resolving node identities.
    pub directory: Arc<dyn NodeDirectory>,
    /// Graceful shutdown controller with health state.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, per-connection settings).
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
