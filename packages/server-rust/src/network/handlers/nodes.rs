//! HTTP endpoints forwarding RPC traffic to connected nodes.
//!
//! This is the calling-code side of the gateway: external HTTP clients
//! address a node by its key and the handlers translate `RpcError` into an
//! HTTP failure. Error bodies use a `detail` field, matching the REST
//! surface the rest of the control plane exposes.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetlink_core::{methods, NodeKey};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::rpc::RpcError;

/// An RPC failure translated to an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<RpcError> for ApiError {
    fn from(err: RpcError) -> Self {
        let status = match &err {
            RpcError::NotConnected => StatusCode::NOT_FOUND,
            RpcError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RpcError::Remote { .. } | RpcError::Protocol(_) | RpcError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

/// Body of `POST /api/nodes/{node_key}/rpc` and `/notify`.
#[derive(Debug, Deserialize)]
pub struct RpcCallRequest {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Per-call deadline override; the configured default applies if absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// `POST /api/nodes/{node_key}/rpc` -- forwards a correlated call.
pub async fn call_node_handler(
    State(state): State<AppState>,
    Path(node_key): Path<i64>,
    Json(request): Json<RpcCallRequest>,
) -> Result<Json<Value>, ApiError> {
    let node = NodeKey(node_key);
    let params = request.params.unwrap_or_else(|| json!({}));

    let result = match request.timeout_ms {
        Some(ms) => {
            state
                .rpc
                .call_with_timeout(node, &request.method, params, Duration::from_millis(ms))
                .await?
        }
        None => state.rpc.call(node, &request.method, params).await?,
    };

    Ok(Json(json!({"result": result})))
}

/// `GET /api/nodes/{node_key}/rpc` -- queries the node's exposed RPC surface.
pub async fn node_methods_handler(
    State(state): State<AppState>,
    Path(node_key): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let reply = state
        .rpc
        .call(NodeKey(node_key), methods::GET_RPC_METHODS, json!({}))
        .await?;

    let Some(list) = reply.get("methods") else {
        return Err(ApiError::new(
            StatusCode::BAD_GATEWAY,
            "Invalid method list from node",
        ));
    };
    Ok(Json(json!({"methods": list})))
}

/// `POST /api/nodes/{node_key}/notify` -- sends a one-way notification.
///
/// 202 on acceptance; the notification itself is best-effort.
pub async fn notify_node_handler(
    State(state): State<AppState>,
    Path(node_key): Path<i64>,
    Json(request): Json<RpcCallRequest>,
) -> Result<StatusCode, ApiError> {
    let params = request.params.unwrap_or_else(|| json!({}));
    state
        .rpc
        .notify(NodeKey(node_key), &request.method, params)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /api/nodes/{node_key}/connection` -- current connectivity.
pub async fn connection_status_handler(
    State(state): State<AppState>,
    Path(node_key): Path<i64>,
) -> Json<Value> {
    Json(json!({"connected": state.rpc.is_connected(NodeKey(node_key))}))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use fleetlink_core::Envelope;
    use tokio::sync::mpsc;

    use super::*;
    use crate::network::connection::{NodeConnection, OutboundFrame};
    use crate::network::{NetworkConfig, ShutdownController};
    use crate::rpc::NodeRpcService;
    use crate::storage::MemoryDirectory;

    fn test_state() -> AppState {
        let config = NetworkConfig::default();
        AppState {
            rpc: Arc::new(NodeRpcService::new(config.rpc.clone())),
            directory: Arc::new(MemoryDirectory::new()),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Binds a connection for node 7 and answers every request with `reply`.
    fn fake_node(state: &AppState, reply: Value) -> tokio::task::JoinHandle<()> {
        let (conn, mut rx) = NodeConnection::channel(&state.config.connection);
        state.rpc.bind_node(NodeKey(7), conn);
        let rpc = Arc::clone(&state.rpc);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let OutboundFrame::Text(text) = frame else { break };
                let request: Envelope = serde_json::from_str(&text).unwrap();
                let id = request.id.unwrap();
                rpc.resolve_response(
                    NodeKey(7),
                    Envelope::response_result(Some(id), reply.clone()),
                );
            }
        })
    }

    fn request(method: &str) -> RpcCallRequest {
        RpcCallRequest {
            method: method.to_string(),
            params: None,
            timeout_ms: None,
        }
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<OutboundFrame>) -> Envelope {
        match rx.recv().await.expect("frame") {
            OutboundFrame::Text(text) => serde_json::from_str(&text).unwrap(),
            OutboundFrame::Close(reason) => panic!("unexpected close: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn call_handler_forwards_and_wraps_result() {
        let state = test_state();
        let _node = fake_node(&state, json!({"robot": {}}));

        let response = call_node_handler(
            State(state),
            Path(7),
            Json(request("node.get_device_types")),
        )
        .await
        .unwrap();
        assert_eq!(response.0, json!({"result": {"robot": {}}}));
    }

    #[tokio::test]
    async fn call_handler_maps_not_connected_to_404() {
        let state = test_state();
        let err = call_node_handler(State(state), Path(99), Json(request("node.ping")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn call_handler_maps_timeout_to_504() {
        let state = test_state();
        // Connected node that never replies.
        let (conn, _rx) = NodeConnection::channel(&state.config.connection);
        state.rpc.bind_node(NodeKey(7), conn);

        let body = RpcCallRequest {
            method: "node.slow".to_string(),
            params: None,
            timeout_ms: Some(30),
        };
        let err = call_node_handler(State(state), Path(7), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn methods_handler_requires_methods_field() {
        let state = test_state();
        let _node = fake_node(&state, json!({"unexpected": true}));

        let err = node_methods_handler(State(state), Path(7)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn methods_handler_extracts_method_list() {
        let state = test_state();
        let _node = fake_node(&state, json!({"methods": ["node.ping"]}));

        let response = node_methods_handler(State(state), Path(7)).await.unwrap();
        assert_eq!(response.0, json!({"methods": ["node.ping"]}));
    }

    #[tokio::test]
    async fn notify_handler_returns_202_and_sends_notification() {
        let state = test_state();
        let (conn, mut rx) = NodeConnection::channel(&state.config.connection);
        state.rpc.bind_node(NodeKey(7), conn);

        let status = notify_node_handler(
            State(state),
            Path(7),
            Json(request("node.update_config")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        let envelope = recv_frame(&mut rx).await;
        assert_eq!(envelope.method.as_deref(), Some("node.update_config"));
        assert!(envelope.id.is_none());
    }

    #[tokio::test]
    async fn notify_handler_maps_not_connected_to_404() {
        let state = test_state();
        let err = notify_node_handler(State(state), Path(99), Json(request("node.ping")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn connection_status_reports_connectivity() {
        let state = test_state();
        let response = connection_status_handler(State(state.clone()), Path(7)).await;
        assert_eq!(response.0, json!({"connected": false}));

        let (conn, _rx) = NodeConnection::channel(&state.config.connection);
        state.rpc.bind_node(NodeKey(7), conn);
        let response = connection_status_handler(State(state), Path(7)).await;
        assert_eq!(response.0, json!({"connected": true}));
    }
}
