//! `FleetLink` core: wire-level types shared by the control plane and node SDKs.
//!
//! Contains the JSON-RPC 2.0 envelope, frame classification, and the
//! identifier newtypes used to address nodes and correlate calls.

pub mod envelope;
pub mod types;

pub use envelope::{codes, methods, Envelope, ErrorObject, FrameKind, JSONRPC_VERSION};
pub use types::{CallId, NodeKey};
