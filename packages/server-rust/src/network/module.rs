//! Network module with deferred startup lifecycle.
//!
//! `new()` creates shared resources, `start()` binds the TCP listener, and
//! `serve()` accepts connections until shutdown is signalled. The split
//! lets the rest of the application wire collaborators between `start()`
//! and `serve()`, and lets tests learn the OS-assigned port before traffic
//! flows.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::connection::OutboundFrame;
use super::handlers::{
    call_node_handler, connection_status_handler, health_handler, liveness_handler,
    node_methods_handler, notify_node_handler, readiness_handler, ws_upgrade_handler, AppState,
};
use super::middleware::apply_http_layers;
use super::shutdown::ShutdownController;
use crate::rpc::NodeRpcService;
use crate::traits::NodeDirectory;

/// How long `serve()` waits for outstanding RPC calls after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Manages the full HTTP/WebSocket server lifecycle.
///
/// The RPC service and shutdown controller are shared via `Arc` so other
/// parts of the application can issue calls and trigger shutdown after
/// construction.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    rpc: Arc<NodeRpcService>,
    directory: Arc<dyn NodeDirectory>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, directory: Arc<dyn NodeDirectory>) -> Self {
        let rpc = Arc::new(NodeRpcService::new(config.rpc.clone()));
        Self {
            config,
            listener: None,
            rpc,
            directory,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Returns a shared reference to the node RPC gateway.
    ///
    /// This is the interface calling code uses to reach connected nodes.
    #[must_use]
    pub fn rpc(&self) -> Arc<NodeRpcService> {
        Arc::clone(&self.rpc)
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `GET /ws/rpc` -- node WebSocket upgrade
    /// - `GET|POST /api/nodes/{node_key}/rpc` -- RPC proxy
    /// - `POST /api/nodes/{node_key}/notify` -- best-effort notification
    /// - `GET /api/nodes/{node_key}/connection` -- connectivity probe
    #[must_use]
    pub fn build_router(&self) -> Router {
        let state = AppState {
            rpc: Arc::clone(&self.rpc),
            directory: Arc::clone(&self.directory),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/ws/rpc", get(ws_upgrade_handler))
            .route(
                "/api/nodes/{node_key}/rpc",
                get(node_methods_handler).post(call_node_handler),
            )
            .route("/api/nodes/{node_key}/notify", post(notify_node_handler))
            .route(
                "/api/nodes/{node_key}/connection",
                get(connection_status_handler),
            )
            .with_state(state);

        apply_http_layers(router, &self.config)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the shutdown future resolves, then drains.
    ///
    /// After the shutdown signal:
    /// 1. Health state transitions to Draining
    /// 2. Every node connection receives a Close frame (sessions must end
    ///    before axum's graceful shutdown can complete)
    /// 3. Waits (bounded) for outstanding RPC calls to settle
    /// 4. Health state transitions to Stopped
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .expect("start() must be called before serve()");
        let rpc = self.rpc;
        let shutdown_ctrl = self.shutdown;

        shutdown_ctrl.set_ready();

        let graceful = {
            let rpc = Arc::clone(&rpc);
            let ctrl = Arc::clone(&shutdown_ctrl);
            async move {
                shutdown.await;
                begin_drain(&rpc, &ctrl);
            }
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await?;

        finish_drain(&rpc, &shutdown_ctrl).await;
        Ok(())
    }
}

/// Evicts and closes every node connection so the in-flight WebSocket
/// sessions end and axum's graceful shutdown can complete.
fn begin_drain(rpc: &NodeRpcService, shutdown_ctrl: &ShutdownController) {
    shutdown_ctrl.trigger_shutdown();

    let handles = rpc.drain_connections();
    if !handles.is_empty() {
        info!("closing {} node connections", handles.len());
        for (_, conn) in &handles {
            let _ = conn.try_send(OutboundFrame::Close(Some("server shutting down".to_string())));
        }
    }
}

/// Waits for outstanding RPC calls to settle, then marks the server stopped.
async fn finish_drain(rpc: &NodeRpcService, shutdown_ctrl: &ShutdownController) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    loop {
        if rpc.pending_calls() == 0 {
            shutdown_ctrl.set_stopped();
            info!("all pending calls drained");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                pending = rpc.pending_calls(),
                "drain timeout expired with calls still pending"
            );
            return;
        }
        // Poll at 10ms intervals to avoid busy-waiting
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
