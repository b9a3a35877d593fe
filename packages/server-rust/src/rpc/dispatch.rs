//! Dispatcher for requests initiated by nodes.
//!
//! The only method a node may legitimately invoke on the control plane is
//! registration; everything else gets a method-not-found reply. The request
//! envelope's `id` is always echoed back so the node can correlate, and a
//! failed handler never terminates the session, it just produces an error
//! reply.

use std::sync::Arc;

use fleetlink_core::{codes, methods, CallId, Envelope, NodeKey};
use serde_json::{json, Value};

use super::gateway::NodeRpcService;
use crate::network::connection::NodeConnection;
use crate::traits::NodeDirectory;

/// Handles one inbound request envelope, returning the reply to transmit
/// and, when the request bound this connection to a node, the node key the
/// session is now active for.
pub async fn dispatch_request(
    rpc: &NodeRpcService,
    directory: &dyn NodeDirectory,
    conn: &Arc<NodeConnection>,
    envelope: Envelope,
) -> (Envelope, Option<NodeKey>) {
    let id = envelope.id;
    let params = envelope.params.unwrap_or(Value::Null);

    match envelope.method.as_deref() {
        Some(methods::REGISTER) => register_node(rpc, directory, conn, id, &params).await,
        _ => (
            Envelope::response_error(id, codes::METHOD_NOT_FOUND, "Method not found"),
            None,
        ),
    }
}

/// `backend.register`: resolves the node's durable identity and binds this
/// connection into the registry under the resulting key.
async fn register_node(
    rpc: &NodeRpcService,
    directory: &dyn NodeDirectory,
    conn: &Arc<NodeConnection>,
    id: Option<CallId>,
    params: &Value,
) -> (Envelope, Option<NodeKey>) {
    let uuid = params
        .get("uuid")
        .and_then(Value::as_str)
        .filter(|uuid| !uuid.is_empty());
    let Some(uuid) = uuid else {
        return (
            Envelope::response_error(id, codes::INVALID_PARAMS, "Missing uuid parameter"),
            None,
        );
    };

    match directory.find_or_create(uuid).await {
        Ok(key) => {
            rpc.bind_node(key, Arc::clone(conn));
            (Envelope::response_result(id, json!({"id": key})), Some(key))
        }
        Err(err) => (
            Envelope::response_error(id, codes::INTERNAL_ERROR, err.to_string()),
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::network::config::{ConnectionConfig, RpcConfig};
    use crate::storage::MemoryDirectory;

    struct FailingDirectory;

    #[async_trait]
    impl NodeDirectory for FailingDirectory {
        async fn find_or_create(&self, _external_id: &str) -> anyhow::Result<NodeKey> {
            anyhow::bail!("database unavailable")
        }
    }

    type Setup = (
        NodeRpcService,
        MemoryDirectory,
        Arc<NodeConnection>,
        tokio::sync::mpsc::Receiver<crate::network::connection::OutboundFrame>,
    );

    fn setup() -> Setup {
        let rpc = NodeRpcService::new(RpcConfig::default());
        let (conn, rx) = NodeConnection::channel(&ConnectionConfig::default());
        (rpc, MemoryDirectory::new(), conn, rx)
    }

    #[tokio::test]
    async fn register_binds_connection_and_returns_key() {
        let (rpc, directory, conn, _rx) = setup();
        let request = Envelope::request(methods::REGISTER, json!({"uuid": "abc"}), CallId(1));

        let (reply, bound) = dispatch_request(&rpc, &directory, &conn, request).await;

        assert_eq!(bound, Some(NodeKey(1)));
        assert_eq!(reply.id, Some(CallId(1)));
        assert_eq!(reply.into_result().unwrap(), json!({"id": 1}));
        assert!(rpc.is_connected(NodeKey(1)));
    }

    #[tokio::test]
    async fn register_same_uuid_twice_yields_same_key() {
        let (rpc, directory, conn, _rx) = setup();
        let first = Envelope::request(methods::REGISTER, json!({"uuid": "abc"}), CallId(1));
        let second = Envelope::request(methods::REGISTER, json!({"uuid": "abc"}), CallId(2));

        let (_, bound1) = dispatch_request(&rpc, &directory, &conn, first).await;
        let (_, bound2) = dispatch_request(&rpc, &directory, &conn, second).await;
        assert_eq!(bound1, bound2);
    }

    #[tokio::test]
    async fn register_without_uuid_is_invalid_params() {
        let (rpc, directory, conn, _rx) = setup();
        let request = Envelope::request(methods::REGISTER, json!({}), CallId(1));

        let (reply, bound) = dispatch_request(&rpc, &directory, &conn, request).await;

        assert!(bound.is_none());
        assert_eq!(reply.id, Some(CallId(1)));
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        assert_eq!(err.message, "Missing uuid parameter");
    }

    #[tokio::test]
    async fn register_with_empty_uuid_is_invalid_params() {
        let (rpc, directory, conn, _rx) = setup();
        let request = Envelope::request(methods::REGISTER, json!({"uuid": ""}), CallId(1));

        let (reply, bound) = dispatch_request(&rpc, &directory, &conn, request).await;
        assert!(bound.is_none());
        assert_eq!(reply.into_result().unwrap_err().code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (rpc, directory, conn, _rx) = setup();
        let request = Envelope::request("backend.reboot", json!({}), CallId(9));

        let (reply, bound) = dispatch_request(&rpc, &directory, &conn, request).await;

        assert!(bound.is_none());
        assert_eq!(reply.id, Some(CallId(9)));
        assert_eq!(reply.into_result().unwrap_err().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn handler_failure_is_internal_error_with_message() {
        let rpc = NodeRpcService::new(RpcConfig::default());
        let (conn, _rx) = NodeConnection::channel(&ConnectionConfig::default());
        let request = Envelope::request(methods::REGISTER, json!({"uuid": "abc"}), CallId(1));

        let (reply, bound) = dispatch_request(&rpc, &FailingDirectory, &conn, request).await;

        assert!(bound.is_none());
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
        assert_eq!(err.message, "database unavailable");
        assert!(!rpc.is_connected(NodeKey(1)));
    }
}
