//! Failure taxonomy for calls issued to nodes.

use std::time::Duration;

use crate::network::connection::SendError;

/// Why a call or notification to a node failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// No live connection for the node key.
    #[error("node not connected")]
    NotConnected,
    /// No reply arrived within the deadline.
    #[error("rpc timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    /// The node returned an error envelope, or the dispatcher rejected an
    /// inbound method or its params.
    #[error("rpc error {code}: {message}")]
    Remote { code: i64, message: String },
    /// A frame could not be built or parsed as a JSON-RPC envelope.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The outbound send failed on a broken or saturated connection.
    #[error("transport error: {0}")]
    Transport(SendError),
}
