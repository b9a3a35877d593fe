//! The outbound call gateway and owning service object.
//!
//! [`NodeRpcService`] encapsulates the connection registry and the request
//! correlator behind one internally synchronized service, passed explicitly
//! to the session handlers and to calling code. Callers issue correlated
//! calls and fire-and-forget notifications; session handlers bind, release,
//! and feed responses through it.

use std::sync::Arc;
use std::time::Duration;

use fleetlink_core::{Envelope, NodeKey};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::correlator::RequestCorrelator;
use super::error::RpcError;
use crate::network::config::RpcConfig;
use crate::network::connection::{NodeConnection, NodeRegistry, OutboundFrame};

/// Gateway for RPC traffic between the control plane and connected nodes.
#[derive(Debug)]
pub struct NodeRpcService {
    registry: NodeRegistry,
    correlator: RequestCorrelator,
    config: RpcConfig,
}

impl NodeRpcService {
    #[must_use]
    pub fn new(config: RpcConfig) -> Self {
        Self {
            registry: NodeRegistry::new(),
            correlator: RequestCorrelator::new(),
            config,
        }
    }

    /// Issues a correlated call with the configured default deadline.
    ///
    /// # Errors
    ///
    /// See [`Self::call_with_timeout`].
    pub async fn call(
        &self,
        node: NodeKey,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        self.call_with_timeout(node, method, params, self.config.default_call_timeout)
            .await
    }

    /// Issues a correlated call to `node` and waits for its reply.
    ///
    /// Fails fast when the node has no live connection: no pending record is
    /// created and nothing is transmitted. Otherwise the request envelope is
    /// sent on the bound connection and the caller suspends until the
    /// matching response arrives or the deadline elapses. Other callers and
    /// the connection's reader task are never blocked by this wait.
    ///
    /// # Errors
    ///
    /// [`RpcError::NotConnected`] when the node is not connected (or its
    /// connection tears down mid-call), [`RpcError::Timeout`] when no reply
    /// arrives in time, [`RpcError::Remote`] when the node replies with an
    /// error envelope, and [`RpcError::Transport`] when the send itself
    /// fails.
    pub async fn call_with_timeout(
        &self,
        node: NodeKey,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let Some(conn) = self.registry.get(node) else {
            return Err(RpcError::NotConnected);
        };

        let (id, slot) = self.correlator.begin_call(node);
        let envelope = Envelope::request(method, params, id);
        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(err) => {
                self.correlator.forget(node, id);
                return Err(RpcError::Protocol(err.to_string()));
            }
        };

        if let Err(err) = conn
            .send_timeout(OutboundFrame::Text(frame), self.config.send_timeout)
            .await
        {
            self.correlator.forget(node, id);
            return Err(RpcError::Transport(err));
        }

        self.correlator.await_call(node, id, slot, timeout).await
    }

    /// Sends a one-way notification to `node`.
    ///
    /// Best-effort: transport failures are logged and swallowed, never
    /// raised to the caller.
    ///
    /// # Errors
    ///
    /// Only [`RpcError::NotConnected`], when the node has no live connection.
    pub async fn notify(
        &self,
        node: NodeKey,
        method: &str,
        params: Value,
    ) -> Result<(), RpcError> {
        let Some(conn) = self.registry.get(node) else {
            return Err(RpcError::NotConnected);
        };

        let envelope = Envelope::notification(method, params);
        match serde_json::to_string(&envelope) {
            Ok(frame) => {
                if let Err(err) = conn
                    .send_timeout(OutboundFrame::Text(frame), self.config.send_timeout)
                    .await
                {
                    warn!(%node, method, %err, "failed to send notification");
                }
            }
            Err(err) => warn!(%node, method, %err, "failed to encode notification"),
        }
        Ok(())
    }

    /// Whether `node` currently has an active connection.
    #[must_use]
    pub fn is_connected(&self, node: NodeKey) -> bool {
        self.registry.is_connected(node)
    }

    /// Number of currently connected nodes.
    #[must_use]
    pub fn connected_nodes(&self) -> usize {
        self.registry.count()
    }

    /// Number of calls currently awaiting a reply, across all nodes.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Binds `conn` as the active connection for `node`, superseding and
    /// closing any previous one. Invoked by the dispatcher on registration.
    pub fn bind_node(&self, node: NodeKey, conn: Arc<NodeConnection>) {
        if let Some(previous) = self.registry.bind(node, conn) {
            warn!(%node, "new registration supersedes existing connection");
            let _ = previous.try_send(OutboundFrame::Close(Some(
                "superseded by a newer connection".to_string(),
            )));
        } else {
            info!(%node, "node bound");
        }
    }

    /// Releases `node`'s registry entry on session teardown, only if `conn`
    /// is still the one on record, and fails its pending calls when so
    /// configured.
    ///
    /// A stale teardown (the node already reconnected) releases nothing and
    /// cancels nothing: replies for calls in flight may still arrive over
    /// the newer connection.
    pub fn release_node(&self, node: NodeKey, conn: &Arc<NodeConnection>) {
        if self.registry.release(node, conn) {
            info!(%node, "node released");
            if self.config.fail_pending_on_disconnect {
                let cancelled = self.correlator.cancel_all(node);
                if cancelled > 0 {
                    info!(%node, cancelled, "failed pending calls on disconnect");
                }
            }
        } else {
            debug!(%node, "stale teardown ignored; a newer connection is bound");
        }
    }

    /// Routes an inbound response envelope to the call awaiting it.
    pub fn resolve_response(&self, node: NodeKey, envelope: Envelope) {
        let Some(id) = envelope.id else {
            debug!(%node, "dropping response without id");
            return;
        };
        self.correlator.resolve(node, id, envelope);
    }

    /// Removes and returns every connection, failing each node's pending
    /// calls when so configured. Used during graceful shutdown.
    pub fn drain_connections(&self) -> Vec<(NodeKey, Arc<NodeConnection>)> {
        let drained = self.registry.drain_all();
        if self.config.fail_pending_on_disconnect {
            for (node, _) in &drained {
                self.correlator.cancel_all(*node);
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use fleetlink_core::FrameKind;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::network::config::ConnectionConfig;

    fn service() -> NodeRpcService {
        NodeRpcService::new(RpcConfig::default())
    }

    fn connect(service: &NodeRpcService, node: NodeKey) -> mpsc::Receiver<OutboundFrame> {
        let (conn, rx) = NodeConnection::channel(&ConnectionConfig::default());
        service.bind_node(node, conn);
        rx
    }

    async fn next_envelope(rx: &mut mpsc::Receiver<OutboundFrame>) -> Envelope {
        match rx.recv().await.expect("frame") {
            OutboundFrame::Text(text) => serde_json::from_str(&text).unwrap(),
            OutboundFrame::Close(reason) => panic!("unexpected close: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn call_to_unknown_node_fails_fast() {
        let service = service();
        let err = service
            .call(NodeKey(99), "node.ping", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::NotConnected);
        // No pending record was created and nothing was transmitted.
        assert_eq!(service.pending_calls(), 0);
    }

    #[tokio::test]
    async fn call_round_trip() {
        let service = Arc::new(service());
        let mut rx = connect(&service, NodeKey(7));

        let node_side = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let request = next_envelope(&mut rx).await;
                assert_eq!(request.classify(), FrameKind::Request);
                assert_eq!(request.method.as_deref(), Some("node.get_device_types"));
                let id = request.id.unwrap();
                service.resolve_response(
                    NodeKey(7),
                    Envelope::response_result(Some(id), json!({"robot": {}})),
                );
            })
        };

        let result = service
            .call(NodeKey(7), "node.get_device_types", json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!({"robot": {}}));
        assert_eq!(service.pending_calls(), 0);
        node_side.await.unwrap();
    }

    #[tokio::test]
    async fn call_times_out_when_node_never_replies() {
        let service = service();
        let _rx = connect(&service, NodeKey(7));

        let err = service
            .call_with_timeout(NodeKey(7), "node.slow", json!({}), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
        assert_eq!(service.pending_calls(), 0);
    }

    #[tokio::test]
    async fn call_on_broken_connection_is_transport_error() {
        let service = NodeRpcService::new(RpcConfig {
            send_timeout: Duration::from_millis(50),
            ..RpcConfig::default()
        });
        let rx = connect(&service, NodeKey(7));
        drop(rx);

        let err = service.call(NodeKey(7), "node.ping", json!({})).await.unwrap_err();
        assert_eq!(err, RpcError::Transport(crate::network::connection::SendError::Disconnected));
        assert_eq!(service.pending_calls(), 0);
    }

    #[tokio::test]
    async fn notify_requires_connection_but_swallows_transport_failures() {
        let service = service();
        assert_eq!(
            service.notify(NodeKey(7), "node.update_config", json!({})).await,
            Err(RpcError::NotConnected)
        );

        let mut rx = connect(&service, NodeKey(7));
        service
            .notify(NodeKey(7), "node.update_config", json!({}))
            .await
            .unwrap();
        let envelope = next_envelope(&mut rx).await;
        assert_eq!(envelope.method.as_deref(), Some("node.update_config"));
        assert!(envelope.id.is_none());

        // A broken connection is logged, not surfaced.
        drop(rx);
        service
            .notify(NodeKey(7), "node.update_config", json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bind_closes_superseded_connection() {
        let service = service();
        let mut old_rx = connect(&service, NodeKey(7));
        let _new_rx = connect(&service, NodeKey(7));

        match old_rx.recv().await.expect("close frame") {
            OutboundFrame::Close(reason) => {
                assert_eq!(reason.as_deref(), Some("superseded by a newer connection"));
            }
            OutboundFrame::Text(text) => panic!("unexpected text frame: {text}"),
        }
        assert_eq!(service.connected_nodes(), 1);
    }

    #[tokio::test]
    async fn release_cancels_pending_calls_when_configured() {
        let service = Arc::new(service());
        let (conn, _rx) = NodeConnection::channel(&ConnectionConfig::default());
        service.bind_node(NodeKey(7), Arc::clone(&conn));

        let caller = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .call_with_timeout(NodeKey(7), "node.slow", json!({}), Duration::from_secs(30))
                    .await
            })
        };

        // Wait for the call to be registered, then tear the session down.
        while service.pending_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.release_node(NodeKey(7), &conn);

        let err = caller.await.unwrap().unwrap_err();
        assert_eq!(err, RpcError::NotConnected);
        assert_eq!(service.pending_calls(), 0);
    }

    #[tokio::test]
    async fn stale_release_keeps_newer_binding() {
        let service = service();
        let (old, _old_rx) = NodeConnection::channel(&ConnectionConfig::default());
        service.bind_node(NodeKey(7), Arc::clone(&old));
        let _new_rx = connect(&service, NodeKey(7));

        service.release_node(NodeKey(7), &old);
        assert!(service.is_connected(NodeKey(7)));
    }
}
