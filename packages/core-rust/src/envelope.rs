//! JSON-RPC 2.0 envelope carried on the persistent node connections.
//!
//! Every frame on the wire is a single JSON object. One envelope type covers
//! all three shapes the protocol uses (request, response, notification)
//! and [`Envelope::classify`] tells them apart the way the session handler
//! needs to: a `method` field marks an inbound request, an `id` together
//! with `result` or `error` marks a response, anything else is malformed.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::CallId;

/// Protocol version string stamped on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known JSON-RPC error codes used on this wire.
pub mod codes {
    /// The requested method does not exist in this scope.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// The request parameters are missing or invalid.
    pub const INVALID_PARAMS: i64 = -32602;
    /// The handler for a known method failed.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Method names with fixed meaning on this wire.
pub mod methods {
    /// Node -> control plane registration, params `{"uuid": "<external-id>"}`.
    pub const REGISTER: &str = "backend.register";
    /// Control plane -> node query for the node's exposed RPC surface.
    pub const GET_RPC_METHODS: &str = "node.get_rpc_methods";
}

/// Deserializes a field that is both optional (can be absent) and nullable
/// (can be null).
///
/// - Absent field -> `None` (outer Option)
/// - Present field with null -> `Some(None)` (inner Option)
/// - Present field with value -> `Some(Some(value))`
///
/// Without this, serde collapses `"result": null` into the outer `None` and
/// a legitimate null-result response would classify as malformed.
#[allow(clippy::option_option)]
fn deserialize_double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

/// Shape of an inbound frame, decided purely by which fields are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Carries a `method`: a call or notification initiated by the peer.
    Request,
    /// Carries an `id` plus `result` or `error`: a reply to an earlier call.
    Response,
    /// Neither shape; the frame is dropped with a warning.
    Malformed,
}

/// Error member of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

/// A single JSON-RPC 2.0 frame.
///
/// Requests carry `method` + `params` + `id`; notifications the same minus
/// `id`; responses carry `id` + exactly one of `result` / `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<CallId>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        deserialize_with = "deserialize_double_option"
    )]
    #[allow(clippy::option_option)]
    pub result: Option<Option<Value>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorObject>,
}

impl Envelope {
    /// Builds a request expecting a correlated reply.
    #[must_use]
    pub fn request(method: impl Into<String>, params: Value, id: CallId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: Some(method.into()),
            params: Some(params),
            id: Some(id),
            result: None,
            error: None,
        }
    }

    /// Builds a one-way notification: no `id`, no reply expected.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: Some(method.into()),
            params: Some(params),
            id: None,
            result: None,
            error: None,
        }
    }

    /// Builds a success response echoing the request's `id`.
    #[must_use]
    pub fn response_result(id: Option<CallId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: None,
            params: None,
            id,
            result: Some(Some(result)),
            error: None,
        }
    }

    /// Builds an error response echoing the request's `id`.
    #[must_use]
    pub fn response_error(id: Option<CallId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: None,
            params: None,
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Classifies an inbound frame by the fields it carries.
    #[must_use]
    pub fn classify(&self) -> FrameKind {
        if self.method.is_some() {
            FrameKind::Request
        } else if self.id.is_some() && (self.result.is_some() || self.error.is_some()) {
            FrameKind::Response
        } else {
            FrameKind::Malformed
        }
    }

    /// Consumes a response envelope, yielding the result payload or the
    /// error member. A present-but-null result becomes `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns the envelope's [`ErrorObject`] when the `error` member is set.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(self.result.flatten().unwrap_or(Value::Null))
    }
}
